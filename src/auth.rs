use rand::Rng;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::Request;
use crate::AppConfig;

pub const STUDIO_API_TOKEN_HEADER: &str = "studio-api-token";

pub fn generate_random_string(len: usize) -> String {
    const WOWELS: &str = "aeiouy";
    const CONSONANTS: &str = "bcdfghjklmnpqrstvwxz";
    let mut rng = rand::rng();
    (0..len)
        .map(|n| {
            let charset = (if n % 2 == 0 { CONSONANTS } else { WOWELS }).as_bytes();
            charset[rng.random_range(0..charset.len())] as char
        })
        .collect()
}

/// Proof that the request carries the studio API token, required for writes.
#[derive(Debug)]
pub struct StudioApiToken(());

#[derive(Debug)]
pub enum ApiTokenError {
    Missing,
    Invalid,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for StudioApiToken {
    type Error = ApiTokenError;
    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(cfg) = request.rocket().state::<AppConfig>() else {
            return Outcome::Error((Status::InternalServerError, ApiTokenError::Invalid));
        };
        match request.headers().get_one(STUDIO_API_TOKEN_HEADER) {
            None => Outcome::Error((Status::Unauthorized, ApiTokenError::Missing)),
            Some(token) if token == cfg.api_token => Outcome::Success(StudioApiToken(())),
            Some(_) => Outcome::Error((Status::Unauthorized, ApiTokenError::Invalid)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_random_string() {
        let s = generate_random_string(10);
        assert_eq!(s.len(), 10);
        for (n, c) in s.chars().enumerate() {
            assert_eq!("aeiouy".contains(c), n % 2 == 1, "unexpected char {c} at {n} in {s}");
        }
    }
}
