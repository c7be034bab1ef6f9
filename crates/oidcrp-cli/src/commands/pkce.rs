use anyhow::Result;
use oidcrp_auth::oauth::PkceChallengeMethod;
use oidcrp_auth::{PkceChallenge, PkceVerifier};
use serde_json::{Value, json};

use crate::cli::{OutputFormat, PkceArgs};
use crate::output::print_value;

pub fn pkce(args: &PkceArgs, format: OutputFormat) -> Result<()> {
    let verifier = match &args.verifier {
        Some(raw) => PkceVerifier::new(raw.as_str())?,
        None => PkceVerifier::generate(),
    };
    print_value(&pair(&verifier), format);
    Ok(())
}

fn pair(verifier: &PkceVerifier) -> Value {
    let challenge = PkceChallenge::from_verifier(verifier);
    json!({
        "code_verifier": verifier.as_str(),
        "code_challenge": challenge.as_str(),
        "code_challenge_method": PkceChallengeMethod::S256.as_str(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_matches_rfc7636_vector() {
        let verifier = PkceVerifier::new("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk").unwrap();
        let value = pair(&verifier);
        assert_eq!(
            value["code_challenge"],
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert_eq!(value["code_challenge_method"], "S256");
    }
}
