use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::dimensions::LifeCycle;

pub const IDENTITY_COLUMNS: [&str; 5] = ["Regiao", "Codigo_UF", "UF", "Codigo_IBGE", "Municipio"];
pub const IBGE_COLUMN: usize = 3;
pub const MUNICIPALITY_COLUMN: usize = 4;
pub const TOTAL_COLUMN_NAME: &str = "Total";

const WEIGHT_FOR_AGE: [&str; 4] = ["MuitoBaixo", "Baixo", "Adequado", "Elevado"];
const BODY_MASS_INDEX: [&str; 6] = [
    "BaixoPeso",
    "Adequado",
    "Sobrepeso",
    "ObesidadeI",
    "ObesidadeII",
    "ObesidadeIII",
];

/// Column layout of the nutritional-status report.
///
/// Both layouts share the five identity columns, then one
/// `<Category>_Qtd, <Category>_Perc` pair per category, then `Total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ReportLayout {
    /// Child weight-for-age, 14 columns.
    WeightForAge,
    /// Adult BMI, 18 columns.
    BodyMassIndex,
}

impl ReportLayout {
    pub const ALL: [ReportLayout; 2] = [ReportLayout::WeightForAge, ReportLayout::BodyMassIndex];

    pub fn categories(self) -> &'static [&'static str] {
        match self {
            ReportLayout::WeightForAge => &WEIGHT_FOR_AGE,
            ReportLayout::BodyMassIndex => &BODY_MASS_INDEX,
        }
    }

    pub fn width(self) -> usize {
        IDENTITY_COLUMNS.len() + 2 * self.categories().len() + 1
    }

    pub fn column_names(self) -> Vec<String> {
        let mut names: Vec<String> = IDENTITY_COLUMNS.iter().map(|c| c.to_string()).collect();
        for category in self.categories() {
            names.push(format!("{category}_Qtd"));
            names.push(format!("{category}_Perc"));
        }
        names.push(TOTAL_COLUMN_NAME.to_string());
        names
    }

    pub fn count_index(self, category: usize) -> usize {
        IDENTITY_COLUMNS.len() + 2 * category
    }

    pub fn percent_index(self, category: usize) -> usize {
        self.count_index(category) + 1
    }

    pub fn percent_indices(self) -> Vec<usize> {
        (0..self.categories().len())
            .map(|c| self.percent_index(c))
            .collect()
    }

    pub fn total_index(self) -> usize {
        self.width() - 1
    }

    pub fn for_life_cycle(life_cycle: LifeCycle) -> Self {
        match life_cycle {
            LifeCycle::Child => ReportLayout::WeightForAge,
            LifeCycle::Adult => ReportLayout::BodyMassIndex,
        }
    }

    pub fn from_width(width: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|layout| layout.width() == width)
    }

    /// Short tag used in output file names.
    pub fn slug(self) -> &'static str {
        match self {
            ReportLayout::WeightForAge => "peso_idade",
            ReportLayout::BodyMassIndex => "imc",
        }
    }
}
