/// Marker some classifiers put in front of the class name.
pub const PREDICTION_PREFIX: &str = "Prediction:";

/// Reduces a raw classifier label to the lookup key used by the mapper.
///
/// The marker is removed, then only the first comma-separated alternative is
/// kept (ImageNet style labels such as `"patio, terrace"` list synonyms).
/// Case is preserved; the mapper folds case on lookup.
pub fn clean_label(raw: &str) -> String {
    let stripped = raw.replace(PREDICTION_PREFIX, "");
    stripped
        .trim()
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::map_label_to_harvesting;

    #[test]
    fn strips_prefix_and_alternatives() {
        assert_eq!(clean_label("Prediction: reaper, something_else"), "reaper");
        assert_eq!(clean_label("Prediction: Patio, x"), "Patio");
        assert_eq!(clean_label("patio, terrace"), "patio");
        assert_eq!(clean_label("  harvester  "), "harvester");
    }

    #[test]
    fn cleaning_is_idempotent() {
        for raw in [
            "Prediction: reaper, something_else",
            "Prediction: Patio, x",
            "tabby, tabby cat",
            "",
            ",",
            "Prediction:",
        ] {
            let once = clean_label(raw);
            assert_eq!(clean_label(&once), once, "raw label {raw:?}");
        }
    }

    #[test]
    fn cleaned_label_maps_case_insensitively() {
        let cleaned = clean_label("Prediction: Patio, x");
        assert_eq!(
            map_label_to_harvesting(&cleaned),
            map_label_to_harvesting("patio")
        );
    }

    #[test]
    fn empty_input_yields_empty_key() {
        assert_eq!(clean_label(""), "");
        assert_eq!(clean_label(", patio"), "");
    }
}
