//! Browser-facing URLs: authorization and logout.

use anyhow::{Result, bail};
use oidcrp_auth::CallbackRequest;
use oidcrp_auth::flow::FlowResponse;
use oidcrp_auth::oauth::build_logout_url;
use serde_json::json;

use crate::cli::{AuthorizeUrlArgs, LogoutUrlArgs, OutputFormat};
use crate::context::RpContext;
use crate::output::print_value;

/// Runs the first leg of a handler's flow and prints the authorization URL
/// with the state the callback must be checked against.
pub async fn authorize_url(
    ctx: &RpContext,
    args: &AuthorizeUrlArgs,
    format: OutputFormat,
) -> Result<()> {
    let services = ctx.flow_services()?;
    let handler = ctx.handler(args.handler.name.as_deref())?;
    let request = CallbackRequest {
        handler_name: Some(handler.name().to_string()),
        complementary_parameter: args.complementary_parameter.clone(),
        back_prompt_url: args.back_prompt_url.clone(),
        ..CallbackRequest::default()
    };

    let step = handler.handle(&services, &request, None).await;
    match step.response {
        FlowResponse::Redirect(url) => {
            print_value(
                &json!({
                    "handler": handler.name(),
                    "authorization_url": url.as_str(),
                    "flow_state": step.state,
                }),
                format,
            );
            Ok(())
        }
        FlowResponse::Failed(failure) => bail!("{}: {}", failure.code, failure.message),
        FlowResponse::Authenticated { .. } => bail!("Handler completed without a callback"),
    }
}

pub async fn logout_url(ctx: &RpContext, args: &LogoutUrlArgs, format: OutputFormat) -> Result<()> {
    let handler = ctx.handler(args.handler.name.as_deref())?;
    let server = ctx.server(&handler).await?;
    let url = build_logout_url(
        &server,
        args.id_token_hint.as_deref(),
        args.post_logout_redirect_uri.as_ref(),
        args.state.as_deref(),
    )?;

    print_value(&json!({ "logout_url": url.as_str() }), format);
    Ok(())
}
