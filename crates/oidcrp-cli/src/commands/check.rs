use anyhow::Result;
use serde_json::{Value, json};

use crate::cli::OutputFormat;
use crate::context::RpContext;
use crate::output::{print_success, print_value};

pub fn check(ctx: &RpContext, format: OutputFormat) -> Result<()> {
    let handlers: Vec<Value> = ctx
        .config
        .handlers
        .iter()
        .map(|handler| {
            json!({
                "name": handler.name,
                "default": handler.default,
                "data_client": handler.data_client,
                "client_id": handler.client.client_id,
                "pkce": handler.client.pkce,
                "discovery": handler.server.discovery,
                "issuer": handler.server.issuer.as_ref().map(|u| u.as_str()),
            })
        })
        .collect();

    if matches!(format, OutputFormat::Text) {
        print_success(&format!("Configuration is valid ({} handlers)", handlers.len()));
        for handler in &handlers {
            print_value(handler, format);
        }
    } else {
        print_value(&json!({ "valid": true, "handlers": handlers }), format);
    }
    Ok(())
}
