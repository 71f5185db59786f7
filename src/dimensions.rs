use std::{fs, path::Path};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// SISVAN population stage (`nu_ciclo_vida`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LifeCycle {
    Child,
    Adult,
}

impl LifeCycle {
    pub fn code(self) -> &'static str {
        match self {
            LifeCycle::Child => "1",
            LifeCycle::Adult => "3",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LifeCycle::Child => "CRIANCA",
            LifeCycle::Adult => "ADULTO",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coded {
    pub code: String,
    pub name: String,
}

impl Coded {
    pub fn new(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
        }
    }
}

/// Age band in years, `start` inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeBand {
    pub code: String,
    pub start: f64,
    pub end: f64,
    pub name: String,
}

/// One point of the race × age band × sex × education × community product.
#[derive(Debug, Clone, PartialEq)]
pub struct Combination {
    pub race: Coded,
    pub age_band: Option<AgeBand>,
    pub sex: Coded,
    pub education: Coded,
    pub community: Coded,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed catalog: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// The dimension values a harvest iterates over.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub races: Vec<Coded>,
    pub sexes: Vec<Coded>,
    pub age_bands: Vec<AgeBand>,
    pub educations: Vec<Coded>,
    pub communities: Vec<Coded>,
}

pub const ALL: &str = "TODOS";

impl Default for Catalog {
    fn default() -> Self {
        let band = |code: &str, start, end, name: &str| AgeBand {
            code: code.to_string(),
            start,
            end,
            name: name.to_string(),
        };
        Self {
            races: vec![
                Coded::new("01", "BRANCA"),
                Coded::new("02", "PRETA"),
                Coded::new("03", "AMARELA"),
                Coded::new("04", "PARDA"),
                Coded::new("05", "INDIGENA"),
                Coded::new("99", "SEM_INFORMACAO"),
            ],
            sexes: vec![Coded::new("M", "MASCULINO"), Coded::new("F", "FEMININO")],
            age_bands: vec![
                band("1", 0.0, 0.5, "MENOR_DE_6_MESES"),
                band("2", 0.5, 2.0, "ENTRE_6_MESES_A_2_ANOS"),
                band("3", 2.0, 5.0, "ENTRE_2_ANOS_A_5_ANOS"),
                band("4", 5.0, 7.0, "ENTRE_5_ANOS_A_7_ANOS"),
                band("5", 7.0, 10.0, "ENTRE_7_ANOS_A_10_ANOS"),
            ],
            educations: vec![Coded::new(ALL, ALL)],
            communities: vec![Coded::new(ALL, ALL)],
        }
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(rename = "RACAS")]
    races: Map<String, Value>,
    #[serde(rename = "SEXOS")]
    sexes: Map<String, Value>,
    #[serde(rename = "FASES_IDADE")]
    age_bands: Map<String, Value>,
    #[serde(rename = "ESCOLARIDADES", default)]
    educations: Option<Map<String, Value>>,
    #[serde(rename = "COMUNIDADES", default)]
    communities: Option<Map<String, Value>>,
}

fn coded_list(map: Map<String, Value>, what: &str) -> Result<Vec<Coded>, CatalogError> {
    map.into_iter()
        .map(|(code, name)| match name {
            Value::String(name) => Ok(Coded { code, name }),
            other => Err(CatalogError::Invalid(format!(
                "{what} `{code}` must map to a name, got {other}"
            ))),
        })
        .collect()
}

impl Catalog {
    /// Reads a catalog with `RACAS`, `SEXOS` and `FASES_IDADE` maps (plus the
    /// optional `ESCOLARIDADES` and `COMUNIDADES`), keeping file order.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(contents)?;
        let defaults = Catalog::default();

        let mut age_bands = Vec::with_capacity(file.age_bands.len());
        for (code, value) in file.age_bands {
            let (start, end, name): (f64, f64, String) = serde_json::from_value(value)?;
            age_bands.push(AgeBand {
                code,
                start,
                end,
                name,
            });
        }

        let catalog = Catalog {
            races: coded_list(file.races, "race")?,
            sexes: coded_list(file.sexes, "sex")?,
            age_bands,
            educations: match file.educations {
                Some(map) => coded_list(map, "education")?,
                None => defaults.educations,
            },
            communities: match file.communities {
                Some(map) => coded_list(map, "community")?,
                None => defaults.communities,
            },
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        for (what, len) in [
            ("races", self.races.len()),
            ("sexes", self.sexes.len()),
            ("educations", self.educations.len()),
            ("communities", self.communities.len()),
        ] {
            if len == 0 {
                return Err(CatalogError::Invalid(format!("no {what} listed")));
            }
        }
        if let Some(band) = self.age_bands.iter().find(|b| !(b.start < b.end)) {
            return Err(CatalogError::Invalid(format!(
                "age band `{}` ends at {} before it starts at {}",
                band.code, band.end, band.start
            )));
        }
        Ok(())
    }

    fn bands_for(&self, life_cycle: LifeCycle) -> Vec<Option<&AgeBand>> {
        match life_cycle {
            LifeCycle::Child if !self.age_bands.is_empty() => {
                self.age_bands.iter().map(Some).collect()
            }
            _ => vec![None],
        }
    }

    pub fn combination_count(&self, life_cycle: LifeCycle) -> usize {
        self.races.len()
            * self.bands_for(life_cycle).len()
            * self.sexes.len()
            * self.educations.len()
            * self.communities.len()
    }

    /// Cartesian product in a stable order; the index of a combination is what
    /// the checkpoint records.
    pub fn combinations(&self, life_cycle: LifeCycle) -> Vec<Combination> {
        let bands = self.bands_for(life_cycle);
        let mut out = Vec::with_capacity(self.combination_count(life_cycle));
        for race in &self.races {
            for band in &bands {
                for sex in &self.sexes {
                    for education in &self.educations {
                        for community in &self.communities {
                            out.push(Combination {
                                race: race.clone(),
                                age_band: band.cloned(),
                                sex: sex.clone(),
                                education: education.clone(),
                                community: community.clone(),
                            });
                        }
                    }
                }
            }
        }
        out
    }

    pub fn race(&self, code: &str) -> Option<&Coded> {
        self.races.iter().find(|r| r.code == code)
    }

    pub fn sex(&self, code: &str) -> Option<&Coded> {
        self.sexes.iter().find(|s| s.code == code)
    }

    pub fn age_band(&self, code: &str) -> Option<&AgeBand> {
        self.age_bands.iter().find(|b| b.code == code)
    }
}
