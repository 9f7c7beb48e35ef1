//! Edit-distance confidence between a user-supplied name and a stored filename.

/// Normalised Levenshtein similarity in `[0, 1]`, case-insensitive.
///
/// Filenames are also compared without their extension so that "q3 report"
/// scores well against "Q3 Report.pdf".
pub fn name_similarity(candidate: &str, filename: &str) -> f64 {
    let a = candidate.trim().to_lowercase();
    let b = filename.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let full = strsim::normalized_levenshtein(&a, &b);
    let stem = strsim::normalized_levenshtein(strip_extension(&a), strip_extension(&b));
    full.max(stem)
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) if pos > 0 && name.len() - pos <= 5 => &name[..pos],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_names_score_one() {
        assert_eq!(name_similarity("test.pdf", "test.pdf"), 1.0);
        assert_eq!(name_similarity("TEST.PDF", "test.pdf"), 1.0);
    }

    #[test]
    fn test_extension_is_ignored_for_stems() {
        let score = name_similarity("annual report", "Annual Report.pdf");
        assert!(score > 0.99, "score was {score}");
    }

    #[test]
    fn test_typo_scores_high_but_not_perfect() {
        let score = name_similarity("anual_report.pdf", "annual_report.pdf");
        assert!(score > 0.9 && score < 1.0, "score was {score}");
    }

    #[test]
    fn test_unrelated_names_score_low() {
        assert!(name_similarity("budget.xlsx", "onboarding_guide.pptx") < 0.4);
        assert_eq!(name_similarity("", "x.pdf"), 0.0);
    }
}
