use chrono::Utc;
use tether_core::auth::Claims;
use tether_core::Credential;

use crate::cli::TokenCommands;
use crate::commands::common::{format_relative_time, Context};
use crate::error::CliError;

pub async fn run_login(
    context: &Context,
    access_token: &str,
    refresh_token: &str,
) -> Result<(), CliError> {
    let coordinator = context.coordinator()?;
    let credential = coordinator
        .install(access_token.trim(), refresh_token.trim())
        .await?;
    let claims = context.config.jwt_validator().validate(&credential.access_token)?;
    println!(
        "Signed in as {} (expires {})",
        account_label(&claims),
        expiry_label(&credential)
    );
    Ok(())
}

pub async fn run_logout(context: &Context) -> Result<(), CliError> {
    context.coordinator()?.sign_out().await?;
    println!("Signed out");
    Ok(())
}

pub async fn run_token(context: &Context, command: TokenCommands) -> Result<(), CliError> {
    match command {
        TokenCommands::Inspect { token } => {
            let token = match token {
                Some(token) => token,
                None => context.stored_access_token()?.ok_or(CliError::NotSignedIn)?,
            };
            let claims = context.config.jwt_validator().validate(token.trim())?;
            for line in format_claims(&claims) {
                println!("{line}");
            }
            Ok(())
        }
        TokenCommands::Refresh => {
            let credential = context.coordinator()?.force_refresh().await?;
            println!("Token refreshed (expires {})", expiry_label(&credential));
            Ok(())
        }
    }
}

fn account_label(claims: &Claims) -> &str {
    if claims.email.is_empty() {
        &claims.subject
    } else {
        &claims.email
    }
}

fn expiry_label(credential: &Credential) -> String {
    format!(
        "{}, {}",
        credential.expires_at.to_rfc3339(),
        format_relative_time(credential.expires_at, Utc::now())
    )
}

pub fn format_claims(claims: &Claims) -> Vec<String> {
    vec![
        format!("subject:    {}", claims.subject),
        format!("email:      {}", claims.email),
        format!("role:       {}", claims.role),
        format!(
            "issuer:     {}",
            claims.issuer.as_deref().unwrap_or("(none)")
        ),
        format!("issued_at:  {}", claims.issued_at.to_rfc3339()),
        format!("expires_at: {}", claims.expires_at.to_rfc3339()),
        format!("expired:    {}", if claims.is_expired { "yes" } else { "no" }),
    ]
}
