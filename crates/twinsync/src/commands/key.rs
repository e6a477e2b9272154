//! `key` handler.

use serde::Serialize;

use twinsync_core::compute_data_sync_key;

use crate::cli::{GlobalOpts, KeyArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct KeyView {
    device_id: String,
    location_id: String,
    data_sync_key: String,
    stable: bool,
}

pub fn handle(args: &KeyArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let key = compute_data_sync_key(&args.device, &args.location, args.guid);
    let view = KeyView {
        device_id: key.device_id().to_owned(),
        location_id: key.location_id().to_owned(),
        data_sync_key: key.to_string(),
        stable: key.is_stable(),
    };

    let out = output::render_single(
        &global.output,
        &view,
        |v| v.data_sync_key.clone(),
        |v| v.data_sync_key.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
