use anyhow::{Result, bail};
use oidcrp_auth::{JwtParser, RpError};
use serde_json::json;

use crate::cli::{OutputFormat, RefreshArgs, ValidateTokenArgs};
use crate::context::RpContext;
use crate::output::{print_success, print_value};

pub async fn refresh(ctx: &RpContext, args: &RefreshArgs, format: OutputFormat) -> Result<()> {
    let handler = ctx.handler(args.handler.name.as_deref())?;
    let server = ctx.server(&handler).await?;
    let exchange = ctx.exchange();

    if args.check {
        if !exchange
            .validate_refresh_token(&server, handler.client(), &args.refresh_token)
            .await
        {
            bail!("Refresh token was rejected by {}", server.token_endpoint);
        }
        print_success("Refresh token is still accepted");
        return Ok(());
    }

    match exchange
        .exchange_refresh_token(&server, handler.client(), &args.refresh_token)
        .await
    {
        Some(token) => {
            print_value(&serde_json::to_value(&token)?, format);
            Ok(())
        }
        None => bail!("Token refresh failed (run with -v for details)"),
    }
}

pub async fn validate_token(
    ctx: &RpContext,
    args: &ValidateTokenArgs,
    format: OutputFormat,
) -> Result<()> {
    let handler = ctx.handler(args.handler.name.as_deref())?;
    let server = ctx.server(&handler).await?;
    let id_token = match ctx
        .jwt
        .parse_id_token(&args.id_token, handler.client(), &server, args.nonce.as_deref())
        .await
    {
        Ok(id_token) => id_token,
        Err(e) => return Err(rejection(e)),
    };

    print_value(
        &json!({
            "valid": true,
            "subject": id_token.subject,
            "issuer": id_token.issuer,
            "audience": id_token.audience,
            "expiration": id_token.expiration,
            "claims": id_token.claims,
        }),
        format,
    );
    Ok(())
}

/// Token problems are reported as a rejection; anything else as a lookup failure.
fn rejection(err: RpError) -> anyhow::Error {
    if err.is_validation_error() {
        anyhow::anyhow!("ID Token rejected: {err}")
    } else if err.is_external_error() {
        anyhow::Error::new(err).context("Could not reach the provider to verify the ID Token")
    } else {
        err.into()
    }
}
