// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use opcpub_config::{PublisherConfig, RegistryKind};

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Loads and validates the configuration, then prints a summary.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;

    let config = opcpub_config::load_config(config_path)
        .map_err(|e| BinError::from(e).with_context("Configuration validation failed"))?;

    let warnings = collect_warnings(&config);

    match args.format {
        OutputFormat::Text => {
            let group = &config.writer_group;
            println!("✓ Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Publisher ID:  {}", config.publisher.id);
            println!("  Writer group:  {} ({})", group.id, group.name);
            println!("  Encoding:      {} / {}", group.encoding, group.schema);
            println!("  Batch size:    {}", group.batch_size);
            println!("  Interval:      {} ms", group.publishing_interval.as_millis());
            println!("  Max msg size:  {}", format_size(group.max_network_message_size));
            println!("  Writers:       {}", config.seed_writer_ids().len());
            println!("  Registry:      {:?} ({})", config.registry.kind, config.registry.endpoint);
            println!("  Sink:          {:?}", config.sink.kind);

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                let value = serde_json::to_value(&config)
                    .map_err(|e| BinError::runtime(format!("failed to render JSON: {}", e)))?;
                println!("{}", to_pretty_json(&value)?);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": {
                    "publisher_id": config.publisher.id,
                    "writer_group_id": config.writer_group.id,
                    "encoding": config.writer_group.encoding,
                    "schema": config.writer_group.schema,
                    "batch_size": config.writer_group.batch_size,
                    "writer_count": config.seed_writer_ids().len(),
                },
                "warnings": warnings,
                "config": if args.show_config { Some(&config) } else { None },
            });
            println!("{}", to_pretty_json(&output)?);
        }
    }

    if args.strict && !warnings.is_empty() {
        return Err(BinError::config(format!(
            "Strict mode: {} warning(s) found",
            warnings.len()
        )));
    }

    Ok(())
}

/// Things that are valid but probably not intended.
pub(crate) fn collect_warnings(config: &PublisherConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let group = &config.writer_group;

    if config.seed_writer_ids().is_empty() {
        warnings.push("No writers configured; the group publishes nothing until the registry reports changes".to_string());
    }

    if config.registry.kind == RegistryKind::Http && config.registry.writer_ids.is_empty() {
        warnings.push("HTTP registry without registry.writer_ids; no writer is downloaded at startup".to_string());
    }

    for writer in config.all_writers() {
        if !writer.enabled {
            warnings.push(format!("Writer '{}' is disabled", writer.id));
        }
        if writer.item_count() == 0 {
            warnings.push(format!("Writer '{}' publishes no variables or events", writer.id));
        }
    }

    if group.max_network_message_size == 0 {
        warnings.push("writer_group.max_network_message_size is 0; messages are unbounded".to_string());
    }

    if let Some(keep_alive) = group.keep_alive_time {
        if keep_alive < group.publishing_interval {
            warnings.push(format!(
                "keep_alive_time ({} ms) is shorter than publishing_interval ({} ms)",
                keep_alive.as_millis(),
                group.publishing_interval.as_millis()
            ));
        }
    }

    if group.batch_size > config.publisher.queue_capacity {
        warnings.push(format!(
            "batch_size ({}) exceeds publisher.queue_capacity ({})",
            group.batch_size, config.publisher.queue_capacity
        ));
    }

    warnings
}

fn format_size(bytes: usize) -> String {
    if bytes == 0 {
        "unbounded".to_string()
    } else {
        format!("{} bytes", bytes)
    }
}

fn to_pretty_json(value: &serde_json::Value) -> BinResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| BinError::runtime(format!("failed to render JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcpub_core::model::{DataSetWriter, PublishedVariable, WriterGroup};
    use std::time::Duration;

    #[test]
    fn test_warnings() {
        let mut group = WriterGroup::new("line-1");
        group.max_network_message_size = 0;
        group.publishing_interval = Duration::from_secs(1);
        group.keep_alive_time = Some(Duration::from_millis(500));

        let mut config = PublisherConfig::new(group);
        config.writers = vec![
            DataSetWriter::new("w1", "line-1", "opc.tcp://a")
                .with_variable(PublishedVariable::new("ns=2;s=Speed"))
                .with_enabled(false),
            DataSetWriter::new("w2", "line-1", "opc.tcp://a"),
        ];

        let warnings = collect_warnings(&config);
        assert!(warnings.iter().any(|w| w.contains("'w1' is disabled")));
        assert!(warnings.iter().any(|w| w.contains("'w2' publishes no")));
        assert!(warnings.iter().any(|w| w.contains("unbounded")));
        assert!(warnings.iter().any(|w| w.contains("keep_alive_time")));
        assert!(!warnings.iter().any(|w| w.contains("No writers")));
    }

    #[test]
    fn test_no_writers_warning() {
        let config = PublisherConfig::new(WriterGroup::new("line-1"));
        assert!(collect_warnings(&config).iter().any(|w| w.starts_with("No writers")));
    }
}
