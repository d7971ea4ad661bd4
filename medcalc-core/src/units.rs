//! Unit conversion between equivalent clinical units.
//!
//! Each [`UnitFamily`] declares one canonical unit (the first entry) and
//! expresses every other unit relative to it, either as a plain factor or, for
//! temperature scales, as a factor plus a shifted zero point.
//! Converting between two units always goes through the canonical unit, so
//! adding a unit never requires a new pairwise factor.

use serde::{Deserialize, Serialize};

/// How a unit relates to its family's canonical unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    /// `canonical = value * factor`.
    Linear(f64),
    /// `value = canonical * factor + zero`, for scales with a shifted origin.
    Affine { factor: f64, zero: f64 },
}

/// One recognized unit inside a family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitDef {
    pub symbol: &'static str,
    /// Alternative spellings, including UCUM codes.
    pub aliases: &'static [&'static str],
    pub conversion: Conversion,
    /// Display precision for values in this unit.
    pub decimals: usize,
}

const fn unit(
    symbol: &'static str,
    aliases: &'static [&'static str],
    scale: f64,
    decimals: usize,
) -> UnitDef {
    UnitDef {
        symbol,
        aliases,
        conversion: Conversion::Linear(scale),
        decimals,
    }
}

const fn affine(
    symbol: &'static str,
    aliases: &'static [&'static str],
    factor: f64,
    zero: f64,
    decimals: usize,
) -> UnitDef {
    UnitDef {
        symbol,
        aliases,
        conversion: Conversion::Affine { factor, zero },
        decimals,
    }
}

impl UnitDef {
    fn matches(&self, symbol: &str) -> bool {
        self.symbol == symbol || self.aliases.contains(&symbol)
    }

    fn to_canonical(&self, value: f64) -> f64 {
        match self.conversion {
            Conversion::Linear(factor) => value * factor,
            Conversion::Affine { factor, zero } => (value - zero) / factor,
        }
    }

    fn from_canonical(&self, value: f64) -> f64 {
        match self.conversion {
            Conversion::Linear(factor) => value / factor,
            Conversion::Affine { factor, zero } => value * factor + zero,
        }
    }
}

/// Named set of mutually convertible units.
#[derive(Debug, PartialEq)]
pub struct UnitFamily {
    pub name: &'static str,
    units: &'static [UnitDef],
}

impl UnitFamily {
    /// Canonical unit every factor in the family is expressed against.
    pub fn standard_unit(&self) -> &'static str {
        self.units[0].symbol
    }

    pub fn units(&self) -> &'static [UnitDef] {
        self.units
    }

    /// Resolve a symbol or alias to its definition.
    pub fn resolve(&self, symbol: &str) -> Option<&'static UnitDef> {
        let symbol = symbol.trim();
        self.units.iter().find(|unit| unit.matches(symbol))
    }

    pub fn convert(&self, value: f64, from: &str, to: &str) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        if from.symbol == to.symbol {
            return Some(value);
        }
        Some(to.from_canonical(from.to_canonical(value)))
    }
}

const MICRO_MOL: &[&str] = &["umol/L", "μmol/L", "micromol/L"];
const BILLION_PER_L: &[&str] = &["10*9/L", "10^9/L", "x10^9/L", "x10E9/L"];
const THOUSAND_PER_UL: &[&str] = &["10*3/uL", "10^3/uL", "x10^3/uL", "×10³/uL", "10³/µL"];

static UNIT_FAMILIES: &[UnitFamily] = &[
    UnitFamily {
        name: "weight",
        units: &[
            unit("kg", &[], 1.0, 1),
            unit("g", &[], 0.001, 0),
            unit("lbs", &["lb", "[lb_av]"], 0.453_592_37, 1),
        ],
    },
    UnitFamily {
        name: "height",
        units: &[
            unit("cm", &[], 1.0, 1),
            unit("m", &[], 100.0, 2),
            unit("mm", &[], 0.1, 0),
            unit("in", &["[in_i]", "inch"], 2.54, 1),
            unit("ft", &["[ft_i]"], 30.48, 2),
        ],
    },
    UnitFamily {
        name: "temperature",
        units: &[
            unit("C", &["Cel", "°C", "degC"], 1.0, 1),
            affine("F", &["[degF]", "°F", "degF"], 1.8, 32.0, 1),
            affine("K", &[], 1.0, 273.15, 1),
        ],
    },
    UnitFamily {
        name: "pressure",
        units: &[
            unit("mmHg", &["mm[Hg]", "mm Hg"], 1.0, 0),
            unit("kPa", &[], 7.500_62, 2),
            unit("bar", &[], 750.062, 3),
        ],
    },
    UnitFamily {
        name: "volume",
        units: &[
            unit("mL", &["ml"], 1.0, 0),
            unit("L", &["l"], 1000.0, 2),
            unit("fl oz", &["[foz_us]"], 29.5735, 1),
            unit("cup", &["[cup_us]"], 236.588, 2),
        ],
    },
    UnitFamily {
        name: "concentration",
        units: &[
            unit("g/L", &[], 1.0, 1),
            unit("g/dL", &[], 10.0, 1),
            unit("mg/dL", &["mg/dl"], 0.01, 0),
        ],
    },
    UnitFamily {
        name: "glucose",
        units: &[
            unit("mg/dL", &["mg/dl"], 1.0, 0),
            unit("mmol/L", &["mmol/l"], 18.018, 1),
        ],
    },
    UnitFamily {
        name: "creatinine",
        units: &[
            unit("mg/dL", &["mg/dl"], 1.0, 2),
            unit("µmol/L", MICRO_MOL, 1.0 / 88.4, 0),
        ],
    },
    UnitFamily {
        name: "calcium",
        units: &[
            unit("mg/dL", &["mg/dl"], 1.0, 2),
            unit("mmol/L", &["mmol/l"], 4.008, 2),
        ],
    },
    UnitFamily {
        name: "albumin",
        units: &[unit("g/dL", &["g/dl"], 1.0, 1), unit("g/L", &["g/l"], 0.1, 0)],
    },
    UnitFamily {
        name: "bilirubin",
        units: &[
            unit("mg/dL", &["mg/dl"], 1.0, 1),
            unit("µmol/L", MICRO_MOL, 1.0 / 17.1, 0),
        ],
    },
    UnitFamily {
        name: "hemoglobin",
        units: &[
            unit("g/dL", &["g/dl"], 1.0, 1),
            unit("g/L", &["g/l"], 0.1, 0),
            unit("mmol/L", &["mmol/l"], 1.611, 1),
        ],
    },
    UnitFamily {
        name: "bun",
        units: &[
            unit("mg/dL", &["mg/dl"], 1.0, 0),
            unit("mmol/L", &["mmol/l"], 2.801, 1),
        ],
    },
    UnitFamily {
        name: "electrolyte",
        units: &[
            unit("mmol/L", &["mmol/l"], 1.0, 1),
            unit("mEq/L", &["meq/L", "meq/l"], 1.0, 1),
        ],
    },
    UnitFamily {
        name: "cholesterol",
        units: &[
            unit("mg/dL", &["mg/dl"], 1.0, 0),
            unit("mmol/L", &["mmol/l"], 38.67, 2),
        ],
    },
    UnitFamily {
        name: "triglycerides",
        units: &[
            unit("mg/dL", &["mg/dl"], 1.0, 0),
            unit("mmol/L", &["mmol/l"], 88.57, 2),
        ],
    },
    UnitFamily {
        name: "platelet",
        units: &[
            unit("×10⁹/L", BILLION_PER_L, 1.0, 0),
            unit("×10³/µL", THOUSAND_PER_UL, 1.0, 0),
            unit("K/µL", &["K/uL"], 1.0, 0),
        ],
    },
    UnitFamily {
        name: "wbc",
        units: &[
            unit("×10⁹/L", BILLION_PER_L, 1.0, 1),
            unit("×10³/µL", THOUSAND_PER_UL, 1.0, 1),
            unit("K/µL", &["K/uL"], 1.0, 1),
        ],
    },
    UnitFamily {
        name: "ddimer",
        units: &[
            unit("mg/L", &["mg/L FEU"], 1.0, 2),
            unit("µg/mL", &["ug/mL", "μg/mL"], 1.0, 2),
            unit("ng/mL", &["ng/mL FEU"], 0.001, 0),
        ],
    },
    UnitFamily {
        name: "fibrinogen",
        units: &[
            unit("g/L", &["g/l"], 1.0, 2),
            unit("mg/dL", &["mg/dl"], 0.01, 0),
        ],
    },
    UnitFamily {
        name: "insulin",
        units: &[
            unit("µU/mL", &["uU/mL", "μU/mL", "u[IU]/mL"], 1.0, 1),
            unit("mU/L", &["m[IU]/L"], 1.0, 1),
            unit("pmol/L", &["pmol/l"], 1.0 / 6.945, 0),
        ],
    },
    UnitFamily {
        name: "phenytoin",
        units: &[
            unit("mcg/mL", &["ug/mL", "µg/mL"], 1.0, 1),
            unit("mg/L", &[], 1.0, 1),
            unit("µmol/L", MICRO_MOL, 1.0 / 3.964, 0),
        ],
    },
    UnitFamily {
        name: "ph",
        units: &[unit("[pH]", &["pH"], 1.0, 2)],
    },
];

/// All declared unit families.
pub fn families() -> &'static [UnitFamily] {
    UNIT_FAMILIES
}

/// Look up a family by name.
pub fn unit_family(name: &str) -> Option<&'static UnitFamily> {
    let name = name.trim();
    UNIT_FAMILIES
        .iter()
        .find(|family| family.name.eq_ignore_ascii_case(name))
}

/// Convert `value` from `from` to `to` within `family`.
///
/// Returns `None` when the family or either unit is not recognized, or when
/// the value is not a finite number. `None` means "cannot normalize" and must
/// never be read as zero.
pub fn convert(value: f64, from: &str, to: &str, family: &str) -> Option<f64> {
    unit_family(family)?.convert(value, from, to)
}

/// Display precision for `unit` in `family`, two places when unknown.
pub fn decimal_places(family: &str, unit: &str) -> usize {
    unit_family(family)
        .and_then(|family| family.resolve(unit))
        .map(|unit| unit.decimals)
        .unwrap_or(2)
}

/// Format a value with the precision its unit is displayed with.
pub fn format_value(value: f64, family: &str, unit: &str) -> String {
    format!("{value:.prec$}", prec = decimal_places(family, unit))
}

/// Value of a form field together with its unit selector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FieldState {
    /// Text currently entered in the field.
    pub raw_value: String,
    /// Unit selected by the unit toggle, if the field has one.
    pub current_unit: Option<String>,
    /// Family the unit toggle converts within.
    pub family: Option<String>,
}

impl FieldState {
    pub fn new(raw_value: impl Into<String>) -> Self {
        Self {
            raw_value: raw_value.into(),
            ..Self::default()
        }
    }

    pub fn with_unit(self, unit: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            current_unit: Some(unit.into()),
            family: Some(family.into()),
            ..self
        }
    }
}

/// Read a field's value expressed in `standard_unit`.
///
/// Fields without a unit selector are assumed to already hold the standard
/// unit. A field whose unit cannot be converted yields `None` rather than the
/// unconverted number.
pub fn get_standard_value(field: &FieldState, standard_unit: &str) -> Option<f64> {
    let value = field.raw_value.trim().parse::<f64>().ok()?;
    if !value.is_finite() {
        return None;
    }

    let Some(current_unit) = field.current_unit.as_deref() else {
        return Some(value);
    };

    match field.family.as_deref() {
        Some(family) => convert(value, current_unit, standard_unit, family),
        None if current_unit.trim() == standard_unit.trim() => Some(value),
        None => None,
    }
}
