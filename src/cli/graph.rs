// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Graph command - visualize a pipeline as a graph

use miette::Result;
use std::path::PathBuf;

use super::{load_pipeline, GraphFormat};

/// Run the graph command
pub async fn run(definition: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    let pipeline = load_pipeline(&definition)?;
    let dag = pipeline.dag();

    // Output in requested format
    let output = match format {
        GraphFormat::Text => dag.to_text(),
        GraphFormat::Dot => dag.to_dot(),
        GraphFormat::Mermaid => dag.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
