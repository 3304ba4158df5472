//! Snapshot-name command implementation.

use super::{read_manifest, CliError};
use batchsync_core::{snapshot_directory, snapshot_directory_name, SyncParameters};
use std::path::Path;

/// Runs the snapshot-name command.
///
/// With a snapshot root, also prints the full directory and whether a
/// snapshot is stored there.
pub fn run(arguments: &[String], root: Option<&Path>) -> Result<(), CliError> {
    let parameters = parse_parameters(arguments)?;
    println!("{}", snapshot_directory_name(&parameters));

    if let Some(root) = root {
        let directory = snapshot_directory(&parameters, root);
        match read_manifest(&directory) {
            Ok(manifest) => println!(
                "{} ({} parts, timestamp {})",
                directory.display(),
                manifest.parts.len(),
                manifest.timestamp
            ),
            Err(CliError::NoManifest(_)) => println!("{} (no snapshot)", directory.display()),
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Parses `name=value` arguments. Values are kept as text.
pub fn parse_parameters(arguments: &[String]) -> Result<SyncParameters, CliError> {
    arguments
        .iter()
        .try_fold(SyncParameters::new(), |parameters, argument| {
            match argument.split_once('=') {
                Some((name, value)) if !name.trim().is_empty() => {
                    Ok(parameters.with(name.trim(), value))
                }
                _ => Err(CliError::InvalidParameter(argument.clone())),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn parses_pairs() {
        let parameters = parse_parameters(&args(&["Region=EU", "City=Rio de Janeiro"])).unwrap();
        assert_eq!(parameters.len(), 2);
        assert_eq!(
            snapshot_directory_name(&parameters),
            "City_RiodeJaneiro_Region_EU"
        );
    }

    #[test]
    fn empty_value_is_allowed() {
        let parameters = parse_parameters(&args(&["Region="])).unwrap();
        assert_eq!(snapshot_directory_name(&parameters), "Region_");
    }

    #[test]
    fn rejects_malformed_arguments() {
        for bad in ["Region", "=EU", " =EU"] {
            let err = parse_parameters(&args(&[bad])).unwrap_err();
            assert!(matches!(err, CliError::InvalidParameter(ref a) if a == bad));
        }
    }

    #[test]
    fn no_arguments_is_all() {
        let parameters = parse_parameters(&[]).unwrap();
        assert_eq!(snapshot_directory_name(&parameters), "ALL");
    }
}
