//! Ingress webhook validation (spec.md §6): field shape/length/charset
//! checks, the repo-URL SSRF guard, HMAC signature verification, and the
//! replay-window timestamp check. Pure functions; the HTTP wiring
//! (`POST /webhook/ci`) lives in the CLI's `serve` command.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use regex::Regex;
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("job: {0}")]
    Job(String),
    #[error("build_number: {0}")]
    BuildNumber(String),
    #[error("branch: {0}")]
    Branch(String),
    #[error("repo_url: {0}")]
    RepoUrl(String),
    #[error("commit_sha: {0}")]
    CommitSha(String),
    #[error("build_logs: {0}")]
    BuildLogs(String),
}

static JOB_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());
static BRANCH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._/-]+$").unwrap());
static COMMIT_SHA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{7,40}$").unwrap());

const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "0.0.0.0",
    "::1",
    "169.254.169.254",
];

pub fn validate_job(job: &str) -> Result<(), ValidationError> {
    if job.is_empty() || job.len() > 100 {
        return Err(ValidationError::Job("must be 1-100 characters".to_string()));
    }
    if !JOB_RE.is_match(job) {
        return Err(ValidationError::Job(
            "must match [A-Za-z0-9._-]+".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_build_number(build_number: i64) -> Result<(), ValidationError> {
    if build_number <= 0 {
        return Err(ValidationError::BuildNumber(
            "must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_branch(branch: &str) -> Result<(), ValidationError> {
    if branch.is_empty() || branch.len() > 200 {
        return Err(ValidationError::Branch(
            "must be 1-200 characters".to_string(),
        ));
    }
    if !BRANCH_RE.is_match(branch) {
        return Err(ValidationError::Branch(
            "must match [A-Za-z0-9._/-]+".to_string(),
        ));
    }
    if branch.contains("..") {
        return Err(ValidationError::Branch("must not contain '..'".to_string()));
    }
    if branch.starts_with('/') || branch.ends_with('/') {
        return Err(ValidationError::Branch(
            "must not have a leading or trailing '/'".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_commit_sha(commit_sha: &str) -> Result<(), ValidationError> {
    if !COMMIT_SHA_RE.is_match(commit_sha) {
        return Err(ValidationError::CommitSha(
            "must be 7-40 hex characters".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_build_logs(build_logs: Option<&str>, max_bytes: usize) -> Result<(), ValidationError> {
    if let Some(logs) = build_logs {
        if logs.len() > max_bytes {
            return Err(ValidationError::BuildLogs(format!(
                "must not exceed {max_bytes} bytes"
            )));
        }
    }
    Ok(())
}

/// Validate `repo_url`'s scheme, length, and guard against SSRF by
/// rejecting blocked hosts and RFC1918 ranges.
pub fn validate_repo_url(repo_url: &str) -> Result<(), ValidationError> {
    if repo_url.len() > 500 {
        return Err(ValidationError::RepoUrl(
            "must not exceed 500 characters".to_string(),
        ));
    }

    let (scheme, rest) = repo_url
        .split_once("://")
        .ok_or_else(|| ValidationError::RepoUrl("missing scheme".to_string()))?;

    if !matches!(scheme, "https" | "http" | "git" | "ssh") {
        return Err(ValidationError::RepoUrl(format!(
            "scheme {scheme:?} is not one of https, http, git, ssh"
        )));
    }

    // Strip optional userinfo (`user@`) and take everything up to the next
    // `/`, `:`, or `?` as the host.
    let after_userinfo = rest.rsplit_once('@').map(|(_, h)| h).unwrap_or(rest);
    let host = after_userinfo
        .split(['/', ':', '?'])
        .next()
        .unwrap_or(after_userinfo)
        .to_ascii_lowercase();

    if BLOCKED_HOSTS.contains(&host.as_str()) {
        return Err(ValidationError::RepoUrl(format!(
            "host {host:?} is blocked"
        )));
    }

    if is_rfc1918(&host) {
        return Err(ValidationError::RepoUrl(format!(
            "host {host:?} is a private-range address"
        )));
    }

    Ok(())
}

fn is_rfc1918(host: &str) -> bool {
    let octets: Vec<&str> = host.split('.').collect();
    if octets.len() != 4 {
        return false;
    }
    let Ok(parts): Result<Vec<u8>, _> = octets.iter().map(|o| o.parse::<u8>()).collect() else {
        return false;
    };
    matches!(
        parts.as_slice(),
        [10, ..] | [172, 16..=31, ..] | [192, 168, ..]
    )
}

/// HMAC algorithm auto-detected from the signature header's prefix.
pub enum SignatureAlgorithm {
    Sha256,
    Sha1,
}

/// Parse `X-CI-Signature`-style header value of the form
/// `sha256=<hex>` / `sha1=<hex>`.
pub fn parse_signature_header(header: &str) -> Option<(SignatureAlgorithm, Vec<u8>)> {
    if let Some(hex) = header.strip_prefix("sha256=") {
        return hex::decode(hex).ok().map(|b| (SignatureAlgorithm::Sha256, b));
    }
    if let Some(hex) = header.strip_prefix("sha1=") {
        return hex::decode(hex).ok().map(|b| (SignatureAlgorithm::Sha1, b));
    }
    None
}

/// Constant-time HMAC verification of `body` against `signature`, under
/// `secret`, using `hmac::Mac::verify_slice` (which itself compares in
/// constant time).
pub fn verify_signature(secret: &[u8], body: &[u8], algorithm: &SignatureAlgorithm, signature: &[u8]) -> bool {
    match algorithm {
        SignatureAlgorithm::Sha256 => {
            let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
                return false;
            };
            mac.update(body);
            mac.verify_slice(signature).is_ok()
        }
        SignatureAlgorithm::Sha1 => {
            let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(secret) else {
                return false;
            };
            mac.update(body);
            mac.verify_slice(signature).is_ok()
        }
    }
}

/// Validate a replay-window timestamp header against wall clock, within
/// `max_skew_seconds` (spec.md §6: "±300 s of wall clock to prevent
/// replay").
pub fn validate_timestamp(
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    max_skew_seconds: i64,
) -> bool {
    (now - timestamp).num_seconds().abs() <= max_skew_seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_accepts_allowed_charset() {
        assert!(validate_job("svc-api.v2_1").is_ok());
    }

    #[test]
    fn job_rejects_disallowed_charset() {
        assert!(validate_job("svc api!").is_err());
    }

    #[test]
    fn job_rejects_over_length() {
        let long = "a".repeat(101);
        assert!(validate_job(&long).is_err());
    }

    #[test]
    fn build_number_must_be_positive() {
        assert!(validate_build_number(0).is_err());
        assert!(validate_build_number(-1).is_err());
        assert!(validate_build_number(1).is_ok());
    }

    #[test]
    fn branch_rejects_dotdot_and_slashes() {
        assert!(validate_branch("feature/../escape").is_err());
        assert!(validate_branch("/leading").is_err());
        assert!(validate_branch("trailing/").is_err());
        assert!(validate_branch("main").is_ok());
    }

    #[test]
    fn commit_sha_boundary_lengths() {
        assert!(validate_commit_sha(&"a".repeat(6)).is_err());
        assert!(validate_commit_sha(&"a".repeat(41)).is_err());
        assert!(validate_commit_sha(&"a".repeat(7)).is_ok());
        assert!(validate_commit_sha(&"a".repeat(40)).is_ok());
    }

    #[test]
    fn build_logs_rejects_over_max_bytes() {
        let max = 10;
        let logs = "x".repeat(11);
        assert!(validate_build_logs(Some(&logs), max).is_err());
        assert!(validate_build_logs(Some(&"x".repeat(10)), max).is_ok());
        assert!(validate_build_logs(None, max).is_ok());
    }

    #[test]
    fn repo_url_rejects_blocked_hosts() {
        assert!(validate_repo_url("https://127.0.0.1/x/svc.git").is_err());
        assert!(validate_repo_url("https://localhost/x/svc.git").is_err());
        assert!(validate_repo_url("https://169.254.169.254/latest/meta").is_err());
    }

    #[test]
    fn repo_url_rejects_rfc1918() {
        assert!(validate_repo_url("https://10.0.0.5/x/svc.git").is_err());
        assert!(validate_repo_url("https://192.168.1.1/x/svc.git").is_err());
        assert!(validate_repo_url("https://172.16.0.1/x/svc.git").is_err());
        assert!(validate_repo_url("https://172.32.0.1/x/svc.git").is_ok());
    }

    #[test]
    fn repo_url_rejects_unknown_scheme() {
        assert!(validate_repo_url("ftp://git.example.com/x/svc.git").is_err());
    }

    #[test]
    fn repo_url_accepts_valid_host() {
        assert!(validate_repo_url("https://git.example.com/x/svc.git").is_ok());
        assert!(validate_repo_url("ssh://git@git.example.com/x/svc.git").is_ok());
    }

    #[test]
    fn signature_header_parses_known_prefixes() {
        let (algo, bytes) = parse_signature_header("sha256=deadbeef").unwrap();
        assert!(matches!(algo, SignatureAlgorithm::Sha256));
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn signature_verification_roundtrip() {
        let secret = b"shhh-secret";
        let body = b"{\"job\":\"svc-api\"}";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(body);
        let tag = mac.finalize().into_bytes().to_vec();

        assert!(verify_signature(secret, body, &SignatureAlgorithm::Sha256, &tag));
        assert!(!verify_signature(secret, b"tampered", &SignatureAlgorithm::Sha256, &tag));
    }

    #[test]
    fn timestamp_within_skew_is_valid() {
        let now = Utc::now();
        assert!(validate_timestamp(now - chrono::Duration::seconds(100), now, 300));
        assert!(!validate_timestamp(now - chrono::Duration::seconds(301), now, 300));
    }
}
