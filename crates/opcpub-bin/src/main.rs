// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! opcpub - OPC UA PubSub writer-group publisher
//!
//! Main binary entry point.

use opcpub_bin::cli::Cli;
use opcpub_bin::commands;
use opcpub_bin::error::report_error_and_exit;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    if let Err(e) = commands::execute(cli).await {
        report_error_and_exit(e);
    }
}
