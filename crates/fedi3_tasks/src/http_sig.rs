/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use http::{HeaderMap, Method, Uri};
use rsa::{
    pkcs1v15::SigningKey,
    pkcs8::DecodePrivateKey,
    signature::{RandomizedSigner, SignatureEncoding},
    RsaPrivateKey,
};
use sha2::{Digest, Sha256};

pub const SIGNED_HEADERS_GET: &[&str] = &["(request-target)", "host", "date"];
pub const SIGNED_HEADERS_POST: &[&str] = &["(request-target)", "host", "date", "digest"];

/// RSA-SHA256 HTTP signature signer for the local actor key.
///
/// Built once at start-up; the parsed key is reused for every request.
#[derive(Clone)]
pub struct Signer {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl Signer {
    pub fn from_pem(key_id: &str, private_key_pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .context("parse private key pem")?;
        Ok(Self {
            key_id: key_id.to_string(),
            signing_key: SigningKey::<Sha256>::new(private_key),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Adds `Date`, `Host`, `Digest` (when there is a body) and `Signature`.
    pub fn sign(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &mut HeaderMap,
        body: &[u8],
    ) -> Result<()> {
        let signed_headers = if body.is_empty() {
            SIGNED_HEADERS_GET
        } else {
            SIGNED_HEADERS_POST
        };

        if !headers.contains_key("Date") {
            let date = httpdate::fmt_http_date(std::time::SystemTime::now());
            headers.insert("Date", date.parse().context("set Date")?);
        }
        if !body.is_empty() && !headers.contains_key("Digest") {
            let digest_b64 = B64.encode(Sha256::digest(body));
            headers.insert(
                "Digest",
                format!("SHA-256={digest_b64}").parse().context("set Digest")?,
            );
        }
        if !headers.contains_key("Host") {
            let auth = uri
                .authority()
                .ok_or_else(|| anyhow!("uri without authority: {uri}"))?;
            headers.insert("Host", auth.as_str().parse().context("set Host")?);
        }

        let signed: Vec<String> = signed_headers.iter().map(|s| s.to_string()).collect();
        let signing_string = build_signing_string(method, uri, headers, &signed)?;

        let mut rng = rand::rngs::OsRng;
        let signature = self
            .signing_key
            .sign_with_rng(&mut rng, signing_string.as_bytes());
        let sig_b64 = B64.encode(signature.to_bytes());

        let sig_header = format!(
            "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{sig_b64}\"",
            self.key_id,
            signed.join(" ")
        );
        headers.insert("Signature", sig_header.parse().context("set Signature")?);
        Ok(())
    }
}

pub fn build_signing_string(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    signed_headers: &[String],
) -> Result<String> {
    let mut out = String::new();
    for (i, name) in signed_headers.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if name == "(request-target)" {
            let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
            out.push_str("(request-target): ");
            out.push_str(&method.as_str().to_ascii_lowercase());
            out.push(' ');
            out.push_str(uri.path());
            out.push_str(&query);
            continue;
        }

        let header_name = http::header::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("bad signed header name: {name}"))?;
        let value = headers
            .get(&header_name)
            .ok_or_else(|| anyhow!("missing signed header: {name}"))?
            .to_str()
            .with_context(|| format!("invalid header value for {name}"))?;
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value.trim());
    }
    Ok(out)
}
