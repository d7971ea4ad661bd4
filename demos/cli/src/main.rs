use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use futures::executor::block_on;
use medcalc_core::{loinc, ObservationQuery, RuntimeConfig};
use medcalc_fhir::{MemoryContainer, MemoryFhirClient, ObservationOptions, ObservationService};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "medcalc-cli",
    about = "Look up the most recent observation for a LOINC code in a FHIR bundle."
)]
struct Args {
    /// Path to the FHIR Bundle JSON file.
    #[arg(short, long)]
    bundle: PathBuf,

    /// LOINC code, or alternatives separated by commas.
    #[arg(short, long)]
    code: String,

    /// Unit to normalize the value into. Without it the value is shown as stored.
    #[arg(short, long)]
    target_unit: Option<String>,

    /// Measurement family overriding the one inferred from the code.
    #[arg(long)]
    unit_type: Option<String>,

    /// EHR vendor tag: generic, epic, cerner or meditech. Defaults to the
    /// config file's vendor, else generic.
    #[arg(long)]
    vendor: Option<String>,

    /// Patient id to scope the search to.
    #[arg(short, long)]
    patient: Option<String>,

    /// Optional JSON runtime configuration. `--vendor` overrides its vendor.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Configuration file contents, with `--vendor` taking precedence.
fn runtime_config(args: &Args) -> anyhow::Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("Could not read config file {path:?}"))?;
            RuntimeConfig::from_json_str(&data)
                .with_context(|| format!("Invalid config file {path:?}"))?
        }
        None => RuntimeConfig::default(),
    };
    if let Some(vendor) = &args.vendor {
        config.ehr.vendor = vendor.clone();
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = runtime_config(&args)?;

    let data = std::fs::read_to_string(&args.bundle)
        .with_context(|| format!("Could not read bundle file {:?}", args.bundle))?;
    let bundle: serde_json::Value = serde_json::from_str(&data)
        .with_context(|| format!("Bundle file {:?} is not valid JSON", args.bundle))?;

    let mut client = MemoryFhirClient::from_bundle(&bundle)?;
    if let Some(patient) = &args.patient {
        client = client.with_patient_id(patient.clone());
    }
    let client = Rc::new(client);

    let service = ObservationService::from_config(client, &config);
    service.attach(Rc::new(MemoryContainer::new("medcalc-cli")));
    info!(vendor = %service.adapter().vendor(), "adapter selected");

    println!(
        "Query: {}",
        service
            .adapter()
            .build_observation_query(&ObservationQuery::most_recent(args.code.as_str()))
    );

    let mut options = match &args.target_unit {
        Some(unit) => ObservationOptions::in_unit(unit.as_str()),
        None => ObservationOptions::default(),
    }
    .tracked("#value");
    if let Some(family) = &args.unit_type {
        options = options.unit_type(family.as_str());
    }

    let result = block_on(service.get_observation(&args.code, &options));
    let name = loinc::loinc_name(&args.code).unwrap_or(args.code.as_str());

    match (result.value, result.unit.as_deref()) {
        (Some(value), unit) => {
            println!("{name}: {value} {}", unit.unwrap_or(""));
            if let (Some(original), Some(original_unit)) =
                (result.original_value, result.original_unit.as_deref())
            {
                println!("Reported as: {original} {original_unit}");
            }
            if let Some(date) = result.date {
                println!("Recorded at: {}", date.to_rfc3339());
            }
            if let Some(age) = result.age_in_days {
                let stale = if result.is_stale { " (stale)" } else { "" };
                println!("Age: {age} days{stale}");
            }
        }
        (None, _) => println!("{name}: no usable value"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_path() -> String {
        format!("{}/tests/data/epic_config.json", env!("CARGO_MANIFEST_DIR"))
    }

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["medcalc-cli", "--bundle", "bundle.json", "--code", "2345-7"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn vendor_defaults_to_generic() {
        let config = runtime_config(&parse(&[])).unwrap();
        assert_eq!(config.ehr.vendor, "generic");
    }

    #[test]
    fn config_file_vendor_is_kept() {
        let path = config_path();
        let config = runtime_config(&parse(&["--config", &path])).unwrap();
        assert_eq!(config.ehr.vendor, "epic");
        assert_eq!(config.staleness.threshold_days, 30);
    }

    #[test]
    fn vendor_flag_overrides_config_file() {
        let path = config_path();
        let config =
            runtime_config(&parse(&["--config", &path, "--vendor", "cerner"])).unwrap();
        assert_eq!(config.ehr.vendor, "cerner");
        assert_eq!(config.staleness.threshold_days, 30);
    }
}
