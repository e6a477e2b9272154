//! `model-id` handler.

use serde::Serialize;
use tabled::Tabled;

use twinsync_core::{TYPE_MODEL_TABLE, compute_model_id, selector_for_type};

use crate::cli::{GlobalOpts, ModelIdArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct ModelMapping {
    type_id: i32,
    selector: String,
    model_id: String,
}

#[derive(Tabled)]
struct MappingRow {
    #[tabled(rename = "Type ID")]
    type_id: i32,
    #[tabled(rename = "Selector")]
    selector: String,
    #[tabled(rename = "Model ID")]
    model_id: String,
}

fn mapping(type_id: i32) -> ModelMapping {
    ModelMapping {
        type_id,
        selector: selector_for_type(type_id).to_string(),
        model_id: compute_model_id(type_id).to_string(),
    }
}

pub fn handle(args: &ModelIdArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mappings: Vec<ModelMapping> = if args.type_ids.is_empty() {
        TYPE_MODEL_TABLE.iter().map(|(id, _)| mapping(*id)).collect()
    } else {
        args.type_ids.iter().copied().map(mapping).collect()
    };

    let out = output::render_list(
        &global.output,
        &mappings,
        |m| MappingRow {
            type_id: m.type_id,
            selector: m.selector.clone(),
            model_id: m.model_id.clone(),
        },
        |m| m.model_id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
