//! LOINC codes used by the calculators and their unit families.

pub const SYSTOLIC_BP: &str = "8480-6";
pub const DIASTOLIC_BP: &str = "8462-4";
/// Blood pressure panel, with the vitals-panel code as alternative.
pub const BP_PANEL: &str = "85354-9,55284-4";
pub const HEART_RATE: &str = "8867-4";
pub const RESPIRATORY_RATE: &str = "9279-1";
pub const TEMPERATURE: &str = "8310-5,8331-1";
pub const OXYGEN_SATURATION: &str = "59408-5";
pub const HEIGHT: &str = "8302-2";
pub const WEIGHT: &str = "29463-7";
pub const HEMOGLOBIN: &str = "718-7";
pub const WBC: &str = "6690-2";
pub const PLATELETS: &str = "777-3";
pub const SODIUM: &str = "2951-2";
pub const POTASSIUM: &str = "2823-3";
pub const BUN: &str = "3094-0";
pub const CREATININE: &str = "2160-0";
pub const GLUCOSE: &str = "2345-7";
pub const CALCIUM: &str = "17861-6";
pub const ALBUMIN: &str = "1751-7";
pub const BILIRUBIN_TOTAL: &str = "1975-2";
pub const INR: &str = "6301-6";
pub const CHOLESTEROL_TOTAL: &str = "2093-3";
pub const TRIGLYCERIDES: &str = "2571-8";
pub const D_DIMER: &str = "48065-7";
pub const FIBRINOGEN: &str = "3255-7";
pub const INSULIN: &str = "20448-7";
pub const PH: &str = "2744-1";

const NAMES: &[(&str, &str)] = &[
    (SYSTOLIC_BP, "systolic bp"),
    (DIASTOLIC_BP, "diastolic bp"),
    ("85354-9", "blood pressure panel"),
    ("55284-4", "blood pressure panel"),
    (HEART_RATE, "heart rate"),
    (RESPIRATORY_RATE, "respiratory rate"),
    ("8310-5", "temperature"),
    ("8331-1", "temperature"),
    (OXYGEN_SATURATION, "oxygen saturation"),
    (HEIGHT, "height"),
    (WEIGHT, "weight"),
    (HEMOGLOBIN, "hemoglobin"),
    (WBC, "wbc"),
    (PLATELETS, "platelets"),
    (SODIUM, "sodium"),
    (POTASSIUM, "potassium"),
    (BUN, "bun"),
    (CREATININE, "creatinine"),
    (GLUCOSE, "glucose"),
    (CALCIUM, "calcium"),
    (ALBUMIN, "albumin"),
    (BILIRUBIN_TOTAL, "bilirubin total"),
    (INR, "inr"),
    (CHOLESTEROL_TOTAL, "cholesterol total"),
    (TRIGLYCERIDES, "triglycerides"),
    (D_DIMER, "d dimer"),
    (FIBRINOGEN, "fibrinogen"),
    (INSULIN, "insulin level"),
    (PH, "ph"),
];

const FAMILIES: &[(&str, &str)] = &[
    ("8310-5", "temperature"),
    ("8331-1", "temperature"),
    (SYSTOLIC_BP, "pressure"),
    (DIASTOLIC_BP, "pressure"),
    (CHOLESTEROL_TOTAL, "cholesterol"),
    ("2085-9", "cholesterol"),
    ("2089-1", "cholesterol"),
    (TRIGLYCERIDES, "triglycerides"),
    (GLUCOSE, "glucose"),
    ("2339-0", "glucose"),
    (CREATININE, "creatinine"),
    ("38483-4", "creatinine"),
    (CALCIUM, "calcium"),
    (ALBUMIN, "albumin"),
    (BILIRUBIN_TOTAL, "bilirubin"),
    ("1968-7", "bilirubin"),
    (HEMOGLOBIN, "hemoglobin"),
    (BUN, "bun"),
    ("6299-8", "bun"),
    (SODIUM, "electrolyte"),
    (POTASSIUM, "electrolyte"),
    (PLATELETS, "platelet"),
    ("26515-7", "platelet"),
    (WBC, "wbc"),
    (D_DIMER, "ddimer"),
    (FIBRINOGEN, "fibrinogen"),
    (INSULIN, "insulin"),
    ("3968-5", "phenytoin"),
    (WEIGHT, "weight"),
    (HEIGHT, "height"),
    (PH, "ph"),
];

fn primary_code(code: &str) -> &str {
    let first = code.split(',').next().unwrap_or(code).trim();
    // Strip a code-system prefix such as `http://loinc.org|`.
    first.rsplit('|').next().unwrap_or(first)
}

/// Unit family used to normalize values of `code`.
///
/// Comma-separated code lists are resolved by their first code.
pub fn measurement_family(code: &str) -> Option<&'static str> {
    let code = primary_code(code);
    FAMILIES
        .iter()
        .find(|(loinc, _)| *loinc == code)
        .map(|(_, family)| *family)
}

/// Human-readable lowercase name for a known code.
pub fn loinc_name(code: &str) -> Option<&'static str> {
    let code = primary_code(code);
    NAMES
        .iter()
        .find(|(loinc, _)| *loinc == code)
        .map(|(_, name)| *name)
}

/// Whether `code` has the `NNNN-N` / `NNNNN-N` LOINC shape.
pub fn is_valid_loinc_code(code: &str) -> bool {
    let Some((body, check)) = code.split_once('-') else {
        return false;
    };
    (4..=5).contains(&body.len())
        && body.chars().all(|c| c.is_ascii_digit())
        && check.len() == 1
        && check.chars().all(|c| c.is_ascii_digit())
}
