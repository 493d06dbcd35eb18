//! Class/job id to abbreviation lookup.

pub const UNKNOWN_JOB: &str = "???";

const JOB_ABBREVIATIONS: &[(u32, &str)] = &[
    (0, "ADV"),
    (1, "GLA"),
    (2, "PGL"),
    (3, "MRD"),
    (4, "LNC"),
    (5, "ARC"),
    (6, "CNJ"),
    (7, "THM"),
    (8, "CRP"),
    (9, "BSM"),
    (10, "ARM"),
    (11, "GSM"),
    (12, "LTW"),
    (13, "WVR"),
    (14, "ALC"),
    (15, "CUL"),
    (16, "MIN"),
    (17, "BTN"),
    (18, "FSH"),
    (19, "PLD"),
    (20, "MNK"),
    (21, "WAR"),
    (22, "DRG"),
    (23, "BRD"),
    (24, "WHM"),
    (25, "BLM"),
    (26, "ACN"),
    (27, "SMN"),
    (28, "SCH"),
    (29, "ROG"),
    (30, "NIN"),
    (31, "MCH"),
    (32, "DRK"),
    (33, "AST"),
    (34, "SAM"),
    (35, "RDM"),
    (36, "BLU"),
    (37, "GNB"),
    (38, "DNC"),
    (39, "RPR"),
    (40, "SGE"),
    (41, "VPR"),
    (42, "PCT"),
];

/// Abbreviation for `job_id`, or [`UNKNOWN_JOB`] when the id isn't known.
pub fn abbreviation(job_id: u32) -> &'static str {
    JOB_ABBREVIATIONS
        .binary_search_by_key(&job_id, |(id, _)| *id)
        .map(|idx| JOB_ABBREVIATIONS[idx].1)
        .unwrap_or(UNKNOWN_JOB)
}
