use crate::{
    dimensions::{ALL, Catalog, Coded, Combination, LifeCycle},
    error::QueryError,
    text_manipulators::format_age,
};

pub const ALL_MONTHS: &str = "99";
pub const ALL_MUNICIPALITIES: &str = "99";
/// `nu_idade_fim` when no age band is selected on the adult form.
const UNSELECTED_AGE: &str = "-SELECIONE-";

/// The parameters of one nutritional-status report request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportQuery {
    pub year: i32,
    /// Two-digit months, or [`ALL_MONTHS`].
    pub months: Vec<String>,
    pub state_code: String,
    pub municipality_code: String,
    pub life_cycle: LifeCycle,
    pub race: Option<String>,
    pub sex: Option<String>,
    pub age_band: Option<(f64, f64)>,
    pub education: String,
    pub community: String,
}

impl ReportQuery {
    pub fn new(year: i32, state_code: &str, life_cycle: LifeCycle) -> Self {
        Self {
            year,
            months: vec![ALL_MONTHS.to_string()],
            state_code: state_code.to_string(),
            municipality_code: ALL_MUNICIPALITIES.to_string(),
            life_cycle,
            race: None,
            sex: None,
            age_band: None,
            education: ALL.to_string(),
            community: ALL.to_string(),
        }
    }

    pub fn for_combination(
        year: i32,
        state_code: &str,
        life_cycle: LifeCycle,
        combination: &Combination,
    ) -> Self {
        Self {
            race: Some(combination.race.code.clone()),
            sex: Some(combination.sex.code.clone()),
            age_band: combination.age_band.as_ref().map(|b| (b.start, b.end)),
            education: combination.education.code.clone(),
            community: combination.community.code.clone(),
            ..Self::new(year, state_code, life_cycle)
        }
    }

    pub fn with_municipality(mut self, code: &str) -> Self {
        self.municipality_code = code.to_string();
        self
    }

    /// Months outside 1..=12 are ignored; an empty selection means all months.
    pub fn with_months(mut self, months: &[u32]) -> Self {
        let picked: Vec<String> = months
            .iter()
            .filter(|m| (1..=12).contains(*m))
            .map(|m| format!("{m:02}"))
            .collect();
        self.months = if picked.is_empty() {
            vec![ALL_MONTHS.to_string()]
        } else {
            picked
        };
        self
    }

    /// Form fields in the order the portal's own form posts them.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let (age_start, age_end) = match (self.age_band, self.life_cycle) {
            (Some((start, end)), _) => (format_age(start), format_age(end)),
            (None, LifeCycle::Adult) => (String::new(), UNSELECTED_AGE.to_string()),
            (None, LifeCycle::Child) => (String::new(), String::new()),
        };

        let mut fields: Vec<(&str, String)> = vec![
            ("tpRelatorio", "2".into()),
            ("coVisualizacao", "1".into()),
            ("nuAno", self.year.to_string()),
        ];
        fields.extend(self.months.iter().map(|m| ("nuMes[]", m.clone())));
        fields.extend([
            ("tpFiltro", "M".into()),
            ("coRegiao", String::new()),
            ("coUfIbge", self.state_code.clone()),
            ("coMunicipioIbge", self.municipality_code.clone()),
            ("noRegional", String::new()),
            ("st_cobertura", "99".into()),
            ("nu_ciclo_vida", self.life_cycle.code().into()),
            ("nu_idade_inicio", age_start),
            ("nu_idade_fim", age_end),
            ("nu_indice_cri", "1".into()),
            ("nu_indice_ado", "1".into()),
            ("nu_idade_ges", "99".into()),
            ("ds_sexo2", self.sex.clone().unwrap_or_default()),
            ("ds_raca_cor2", self.race.clone().unwrap_or_default()),
            ("co_sistema_origem", "0".into()),
            ("CO_POVO_COMUNIDADE", self.community.clone()),
            ("CO_ESCOLARIDADE", self.education.clone()),
            ("verTela", String::new()),
        ]);

        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    pub fn describe(&self) -> String {
        let age = match self.age_band {
            Some((start, end)) => format!("{}-{}", format_age(start), format_age(end)),
            None => "-".to_string(),
        };
        format!(
            "year {} | uf {} | municipality {} | cycle {} | race {} | sex {} | age {} | education {} | community {}",
            self.year,
            self.state_code,
            self.municipality_code,
            self.life_cycle.name(),
            self.race.as_deref().unwrap_or("all"),
            self.sex.as_deref().unwrap_or("all"),
            age,
            self.education,
            self.community,
        )
    }
}

/// Builds the single combination a one-off fetch asks for.
///
/// `None` when no dimension is given, so the report is requested unfiltered.
/// An unset race or sex is posted empty, which the portal reads as all of them.
pub fn pick_combination(
    catalog: &Catalog,
    life_cycle: LifeCycle,
    race: Option<&str>,
    sex: Option<&str>,
    age_band: Option<&str>,
) -> Result<Option<Combination>, QueryError> {
    if race.is_none() && sex.is_none() && age_band.is_none() {
        return Ok(None);
    }
    let unknown = |dimension, code: &str| QueryError::UnknownCode {
        dimension,
        code: code.to_string(),
    };
    let all = || Coded::new("", ALL);
    let race = match race {
        Some(code) => catalog.race(code).cloned().ok_or_else(|| unknown("race", code))?,
        None => all(),
    };
    let sex = match sex {
        Some(code) => catalog.sex(code).cloned().ok_or_else(|| unknown("sex", code))?,
        None => all(),
    };
    let age_band = match (age_band, life_cycle) {
        (Some(code), LifeCycle::Child) => Some(
            catalog
                .age_band(code)
                .cloned()
                .ok_or_else(|| unknown("age band", code))?,
        ),
        (Some(_), LifeCycle::Adult) => return Err(QueryError::AgeBandForAdult),
        (None, _) => None,
    };
    Ok(Some(Combination {
        race,
        age_band,
        sex,
        education: catalog.educations.first().cloned().unwrap_or_else(|| Coded::new(ALL, ALL)),
        community: catalog.communities.first().cloned().unwrap_or_else(|| Coded::new(ALL, ALL)),
    }))
}
