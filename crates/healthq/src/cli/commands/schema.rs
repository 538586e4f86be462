use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::print_envelope;
use crate::models::{QueryEnvelope, TOOL_NAME, tool_definition};

const COMMAND: &str = "schema";

#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {
    /// Print the bare tool definition instead of an envelope.
    #[arg(long, default_value_t = false)]
    pub raw: bool,
}

pub fn run(args: &SchemaArgs) -> Result<()> {
    let definition = tool_definition();
    if args.raw {
        println!("{definition}");
        return Ok(());
    }

    print_envelope(
        &QueryEnvelope::ok(COMMAND, definition).with_meta("tool_name", json!(TOOL_NAME)),
    )
}
