use crate::{
    dimensions::{AgeBand, Coded, Combination, LifeCycle},
    layout::ReportLayout,
};

/// One count/percentage pair of a report category.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Metric {
    pub count: Option<u64>,
    pub percent: Option<f64>,
}

/// A municipality line of the report, with numbers already parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct MunicipalityRow {
    pub layout: ReportLayout,
    pub region: String,
    pub state_code: String,
    pub state: String,
    pub ibge_code: String,
    pub municipality: String,
    /// One entry per `layout.categories()`, same order.
    pub metrics: Vec<Metric>,
    pub total: Option<u64>,
}

impl MunicipalityRow {
    pub fn metric(&self, category: &str) -> Option<&Metric> {
        self.layout
            .categories()
            .iter()
            .position(|c| *c == category)
            .and_then(|i| self.metrics.get(i))
    }
}

/// The dimension values a row was requested with.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionTags {
    pub year: i32,
    pub life_cycle: LifeCycle,
    pub race: Coded,
    pub sex: Coded,
    pub age_band: Option<AgeBand>,
    pub education: Coded,
    pub community: Coded,
}

impl DimensionTags {
    pub fn new(year: i32, life_cycle: LifeCycle, combination: &Combination) -> Self {
        Self {
            year,
            life_cycle,
            race: combination.race.clone(),
            sex: combination.sex.clone(),
            age_band: combination.age_band.clone(),
            education: combination.education.clone(),
            community: combination.community.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub tags: DimensionTags,
    pub row: MunicipalityRow,
}
