use serde::Serialize;

const OPEN_LAND_SUGGESTION: &str = "Farm pond or check dam (for open agricultural land)";
const OPEN_LAND_PDF: &str = "Farm_Pond_or_Check_Dam.pdf";
const ROOFTOP_SUGGESTION: &str = "Rooftop rainwater harvesting (best for buildings/terraces)";
const ROOFTOP_PDF: &str = "Rooftop_Rainwater_Harvesting.pdf";

pub const NO_MAPPING_SUGGESTION: &str = "No harvesting method mapped for this label";

/// Label keys are lower-case; lookups fold the incoming label before matching.
///
/// `harvester` shares the farm-pond guide with `reaper`. Older deployments
/// answered it with a bare `".pdf"` reference, which pointed at no document.
const HARVESTING_TABLE: &[(&str, &str, &str)] = &[
    ("harvester", OPEN_LAND_SUGGESTION, OPEN_LAND_PDF),
    ("reaper", OPEN_LAND_SUGGESTION, OPEN_LAND_PDF),
    ("patio", ROOFTOP_SUGGESTION, ROOFTOP_PDF),
    ("terrace", ROOFTOP_SUGGESTION, ROOFTOP_PDF),
];

/// A recommended rainwater-harvesting structure and the guide that describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub suggestion: String,
    pub pdf: Option<String>,
}

impl Recommendation {
    /// Returned for labels without a table entry.
    pub fn no_mapping() -> Self {
        Self {
            suggestion: NO_MAPPING_SUGGESTION.to_string(),
            pdf: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.pdf.is_some()
    }
}

pub fn map_label_to_harvesting(label: &str) -> Recommendation {
    let key = label.to_lowercase();
    HARVESTING_TABLE
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|(_, suggestion, pdf)| Recommendation {
            suggestion: suggestion.to_string(),
            pdf: Some(pdf.to_string()),
        })
        .unwrap_or_else(Recommendation::no_mapping)
}
