//! Shared pipeline logic behind the CLI commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! catalog load -> prepare -> optimize + sample -> persist model ->
//! homogenise -> upsert + summary.

use tracing::info;

use crate::cli::{FitArgs, HomogeniseArgs, SummaryArgs};
use crate::config::HomogConfig;
use crate::domain::{NodeFilter, StarSelector, WorkingGroup};
use crate::error::HomogError;
use crate::fit::fit_ensemble;
use crate::homog::Homogeniser;
use crate::model_io::{read_model, write_model};
use crate::prepare::prepare;
use crate::store::MemoryStore;

fn parse_wg(raw: &str) -> Result<WorkingGroup, HomogError> {
    WorkingGroup::parse(raw)
        .ok_or_else(|| HomogError::Config(format!("invalid working group '{raw}'")))
}

fn load_config(path: Option<&std::path::Path>) -> Result<HomogConfig, HomogError> {
    let config = match path {
        Some(p) => HomogConfig::load(p)?,
        None => HomogConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Fit one (working group, parameter) and persist the model.
pub fn run_fit(args: &FitArgs) -> Result<(), HomogError> {
    let wg = parse_wg(&args.wg)?;
    let config = load_config(args.config.as_deref())?;
    let store = MemoryStore::load_json(&args.catalog)?;

    let filter = match &args.node_prefix {
        Some(prefix) => NodeFilter::with_prefix(prefix.clone()),
        None => NodeFilter::any(),
    };

    let data = prepare(&store, wg, args.parameter, &filter, &config)?;
    let fit = fit_ensemble(&data, &config)?;
    write_model(&args.model_out, &fit)?;

    println!("{}", crate::report::format_fit_summary(&fit));
    Ok(())
}

/// Apply a persisted model to selected stars and write consensus rows back.
pub fn run_homogenise(args: &HomogeniseArgs) -> Result<(), HomogError> {
    let wg = parse_wg(&args.wg)?;
    let mut store = MemoryStore::load_json(&args.catalog)?;
    let fit = read_model(&args.model)?;

    let homogeniser = Homogeniser::new(&fit, wg, args.parameter)?;
    let selector = if !args.stars.is_empty() {
        StarSelector::Ids(args.stars.clone())
    } else if let Some(setup) = &args.setup {
        StarSelector::Setup(setup.clone())
    } else {
        StarSelector::All
    };

    let batch = homogeniser.homogenise(&mut store, &selector)?;

    let out = args.out.as_deref().unwrap_or(&args.catalog);
    store.save_json(out)?;
    info!(path = %out.display(), "wrote updated catalog");

    println!(
        "{}",
        crate::report::format_batch_summary(&batch, wg, args.parameter)
    );
    Ok(())
}

/// Print the node table of a persisted model.
pub fn run_summary(args: &SummaryArgs) -> Result<(), HomogError> {
    let fit = read_model(&args.model)?;
    println!("{}", crate::report::format_fit_summary(&fit));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wg_parsing_accepts_both_spellings() {
        assert_eq!(parse_wg("wg11").unwrap(), WorkingGroup(11));
        assert_eq!(parse_wg("1").unwrap(), WorkingGroup(1));
        assert!(parse_wg("uves").is_err());
    }
}
