use crate::numerical::retrieval::bayesian_optimizer::RetrievalResult;
use crate::numerical::retrieval::retrieval_errors::{RetrievalError, RetrievalOutcome};
use chrono::Local;
use csv::Writer;
use log::info;
use simplelog::*;
use std::fs::File;
use std::io;
use std::path::Path;

/// Map a textual log level onto a filter; `None` means info.
pub fn log_level_from(loglevel: Option<&str>) -> RetrievalOutcome<LevelFilter> {
    match loglevel {
        None => Ok(LevelFilter::Info),
        Some("debug") => Ok(LevelFilter::Debug),
        Some("info") => Ok(LevelFilter::Info),
        Some("warn") => Ok(LevelFilter::Warn),
        Some("error") => Ok(LevelFilter::Error),
        Some("off") | Some("none") => Ok(LevelFilter::Off),
        Some(other) => Err(RetrievalError::InvalidSetting {
            name: "loglevel",
            reason: format!("must be debug, info, warn, error or off, got {}", other),
        }),
    }
}

/// `log_<date>_<time>.txt`
pub fn timestamped_log_name() -> String {
    let date_and_time = Local::now().format("%Y-%m-%d_%H-%M-%S");
    format!("log_{}.txt", date_and_time)
}

/// `auto` becomes a timestamped name, anything else is used as given
pub fn resolve_log_file(log_file: Option<String>) -> Option<String> {
    log_file.map(|name| {
        if name == "auto" {
            timestamped_log_name()
        } else {
            name
        }
    })
}

/// Terminal logger plus an optional file logger. A logger installed earlier wins silently.
pub fn init_logger(loglevel: Option<String>, log_file: Option<String>) -> RetrievalOutcome<()> {
    let level = log_level_from(loglevel.as_deref())?;
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(name) = resolve_log_file(log_file) {
        info!("logging to file {}", name);
        let file = File::create(&name)
            .map_err(|e| RetrievalError::Config(format!("cannot create log file {}: {}", name, e)))?;
        loggers.push(WriteLogger::new(level, Config::default(), file));
    }
    let _ = CombinedLogger::init(loggers);
    Ok(())
}

/// One row per unit: parameters, error, converged.
pub fn save_results_to_csv(
    results: &[RetrievalResult],
    parameter_names: &[String],
    filename: impl AsRef<Path>,
) -> io::Result<()> {
    let file = File::create(filename)?;
    let mut writer = Writer::from_writer(file);

    let mut headers: Vec<String> = parameter_names.to_vec();
    headers.push("error".to_string());
    headers.push("converged".to_string());
    writer.write_record(&headers)?;

    for result in results {
        if result.parameters.len() != parameter_names.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "result has {} parameters, header has {}",
                    result.parameters.len(),
                    parameter_names.len()
                ),
            ));
        }
        let mut row: Vec<String> = result.parameters.iter().map(|p| p.to_string()).collect();
        row.push(result.error.to_string());
        row.push(result.converged.to_string());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::retrieval::bayesian_optimizer::TerminationReason;
    use nalgebra::DVector;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_log_levels() {
        assert_eq!(log_level_from(None).unwrap(), LevelFilter::Info);
        assert_eq!(log_level_from(Some("debug")).unwrap(), LevelFilter::Debug);
        assert_eq!(log_level_from(Some("off")).unwrap(), LevelFilter::Off);
        assert!(log_level_from(Some("verbose")).is_err());
    }

    #[test]
    fn test_auto_log_file_is_timestamped() {
        let name = resolve_log_file(Some("auto".to_string())).unwrap();
        let stamp = name
            .strip_prefix("log_")
            .and_then(|rest| rest.strip_suffix(".txt"))
            .unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d_%H-%M-%S").is_ok());

        assert_eq!(
            resolve_log_file(Some("run.log".to_string())),
            Some("run.log".to_string())
        );
        assert_eq!(resolve_log_file(None), None);
    }

    #[test]
    fn test_init_logger_creates_log_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("retrieval.log");
        init_logger(Some("off".to_string()), Some(path.to_string_lossy().to_string())).unwrap();
        assert!(path.exists());
        assert!(init_logger(Some("loud".to_string()), None).is_err());
    }

    #[test]
    fn test_save_results_to_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let results = vec![
            RetrievalResult {
                parameters: DVector::from_vec(vec![9.0, 1.0]),
                error: 0.0,
                converged: true,
                iterations: 1,
                termination: TerminationReason::Converged,
            },
            RetrievalResult {
                parameters: DVector::from_vec(vec![2.5, 0.5]),
                error: 0.25,
                converged: false,
                iterations: 50,
                termination: TerminationReason::MaxIterations,
            },
        ];
        let names = vec!["moisture".to_string(), "roughness".to_string()];
        save_results_to_csv(&results, &names, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "moisture,roughness,error,converged");
        assert_eq!(lines[1], "9,1,0,true");
        assert_eq!(lines[2], "2.5,0.5,0.25,false");

        let wrong = vec!["moisture".to_string()];
        assert!(save_results_to_csv(&results, &wrong, &path).is_err());
    }
}
