//! One-shot evaluator CLI
//!
//! Runs a single stacking evaluation against a tariff store and prints the
//! filing lines and duty breakdown as JSON.
//!
//! ```text
//! tariff_eval --hts 8544.42.9090 --country China --value 10000 \
//!     --date 2025-12-15 --materials '{"copper":{"value":3000}}' --seed
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::collections::HashMap;
use tariffline_backend::models::{EvaluationRequest, MaterialInput};
use tariffline_backend::{bootstrap, Evaluator, TariffStore};

#[derive(Parser, Debug)]
#[command(name = "tariff_eval", about = "Evaluate tariff stacking for one import")]
struct Args {
    /// HTS code, 8+ digits, dots accepted
    #[arg(long)]
    hts: String,

    /// Country of origin
    #[arg(long)]
    country: String,

    /// Declared product value
    #[arg(long)]
    value: f64,

    /// Import date (defaults to today)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Material composition as JSON, e.g. '{"copper":{"value":3000}}'
    #[arg(long)]
    materials: Option<String>,

    /// Tariff store path
    #[arg(long, env = "TARIFF_DB_PATH", default_value = "tariffline.db")]
    db: String,

    /// Seed the baseline dataset if the store is empty
    #[arg(long)]
    seed: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let store = TariffStore::new(&args.db)?;
    if args.seed {
        bootstrap::seed_baseline(&store)?;
    }

    let materials: Option<HashMap<String, MaterialInput>> = args
        .materials
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("materials must be a JSON object of material -> number|{percent,value,mass_kg}")?;

    let request = EvaluationRequest {
        hts_code: args.hts,
        country: args.country,
        product_value: args.value,
        import_date: args.date,
        materials,
        product_description: None,
    };

    let evaluator = Evaluator::new(&store);
    let result = evaluator.evaluate(&request)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
