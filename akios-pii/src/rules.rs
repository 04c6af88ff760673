//! The curated pattern pack. One entry per recognized PII shape, each
//! carrying the priority/context gating used by overlap resolution.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::validators;
use crate::PiiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Personal,
    Financial,
    Health,
    Location,
    Communication,
    Digital,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sensitivity {
    Low,
    Medium,
    High,
    Critical,
}

pub struct CompiledPattern {
    pub name: &'static str,
    pub category: Category,
    pub sensitivity: Sensitivity,
    pub priority: i32,
    pub context_keywords: Option<&'static [&'static str]>,
    pub validator: Option<fn(&str) -> bool>,
    pub regex: Regex,
}

struct PatternDef {
    name: &'static str,
    category: Category,
    sensitivity: Sensitivity,
    priority: i32,
    pattern: &'static str,
    context_keywords: Option<&'static [&'static str]>,
    validator: Option<fn(&str) -> bool>,
}

macro_rules! pat {
    ($name:expr, $cat:expr, $sens:expr, $prio:expr, $re:expr) => {
        PatternDef {
            name: $name,
            category: $cat,
            sensitivity: $sens,
            priority: $prio,
            pattern: $re,
            context_keywords: None,
            validator: None,
        }
    };
    ($name:expr, $cat:expr, $sens:expr, $prio:expr, $re:expr, ctx: $ctx:expr) => {
        PatternDef {
            name: $name,
            category: $cat,
            sensitivity: $sens,
            priority: $prio,
            pattern: $re,
            context_keywords: Some($ctx),
            validator: None,
        }
    };
    ($name:expr, $cat:expr, $sens:expr, $prio:expr, $re:expr, val: $val:expr) => {
        PatternDef {
            name: $name,
            category: $cat,
            sensitivity: $sens,
            priority: $prio,
            pattern: $re,
            context_keywords: None,
            validator: Some($val),
        }
    };
    ($name:expr, $cat:expr, $sens:expr, $prio:expr, $re:expr, ctx: $ctx:expr, val: $val:expr) => {
        PatternDef {
            name: $name,
            category: $cat,
            sensitivity: $sens,
            priority: $prio,
            pattern: $re,
            context_keywords: Some($ctx),
            validator: Some($val),
        }
    };
}

use Category::*;
use Sensitivity::*;

static DEFS: &[PatternDef] = &[
    pat!("email", Communication, Medium, 60, r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}", val: validators::validate_email),
    pat!("phone_us", Communication, Medium, 55, r"\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}", val: validators::validate_phone),
    pat!("phone_intl", Communication, Medium, 50, r"\+\d{1,3}[-.\s]?\d{2,4}[-.\s]?\d{3,4}[-.\s]?\d{3,4}", val: validators::validate_phone),
    pat!("ssn", Personal, Critical, 95, r"\b\d{3}-\d{2}-\d{4}\b"),
    pat!("credit_card", Financial, Critical, 90, r"\b(?:\d[ -]?){13,19}\b", val: validators::validate_credit_card),
    pat!("iban", Financial, Critical, 85, r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b", val: validators::validate_iban),
    pat!("bank_account_us", Financial, High, 40, r"\b\d{8,17}\b", ctx: &["account number", "routing", "bank account", "acct"]),
    pat!("routing_number", Financial, High, 42, r"\b\d{9}\b", ctx: &["routing number", "aba"]),
    pat!("ip_address", Digital, Medium, 45, r"\b(?:\d{1,3}\.){3}\d{1,3}\b", val: validators::validate_ip_address),
    pat!("ipv6_address", Digital, Medium, 44, r"\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b"),
    pat!("mac_address", Digital, Low, 30, r"\b(?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}\b"),
    pat!("coordinates", Location, Medium, 48, r"-?\d{1,3}\.\d{3,},\s*-?\d{1,3}\.\d{3,}", val: validators::validate_coordinates),
    pat!("street_address", Location, Medium, 35, r"\b\d{1,5}\s+[A-Z][a-zA-Z]+\s(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr)\b"),
    pat!("zip_code", Location, Low, 20, r"\b\d{5}(?:-\d{4})?\b", ctx: &["zip", "zip code", "postal code"]),
    pat!("passport_number", Personal, Critical, 80, r"\b[A-Z]{1,2}\d{6,9}\b", ctx: &["passport"]),
    pat!("drivers_license", Personal, High, 65, r"\b[A-Z]\d{7,12}\b", ctx: &["driver's license", "drivers license", "dl number"]),
    pat!("date_of_birth", Personal, High, 60, r"\b(?:0[1-9]|1[0-2])[/-](?:0[1-9]|[12]\d|3[01])[/-](?:19|20)\d{2}\b", ctx: &["date of birth", "dob", "born"]),
    pat!("us_ein", Financial, High, 58, r"\b\d{2}-\d{7}\b", ctx: &["ein", "employer identification"]),
    pat!("uk_nino", Personal, Critical, 75, r"\b[A-CEGHJ-PR-TW-Z]{2}\d{6}[A-D]\b"),
    pat!("france_id", Personal, High, 55, r"\b\d{13}\b", ctx: &["numero de securite sociale", "insee"]),
    pat!("germany_id", Personal, High, 55, r"\b\d{11}\b", ctx: &["steuer-id", "tax id"]),
    pat!("medical_record_number", Health, Critical, 88, r"\bMRN[-:\s]?\d{6,10}\b"),
    pat!("health_insurance_id", Health, Critical, 82, r"\b[A-Z]{3}\d{9}\b", ctx: &["insurance id", "member id", "policy number"]),
    pat!("diagnosis_code_icd10", Health, High, 50, r"\b[A-TV-Z][0-9][0-9AB](?:\.[0-9A-TV-Z]{1,4})?\b", ctx: &["diagnosis", "icd-10", "icd10"]),
    pat!("prescription_number", Health, High, 50, r"\bRx[-:\s]?\d{6,9}\b"),
    pat!("api_key", Digital, Critical, 92, r"\b[A-Za-z0-9_\-]{32,64}\b", ctx: &["api key", "apikey", "api_key"]),
    pat!("aws_access_key", Digital, Critical, 95, r"\bAKIA[0-9A-Z]{16}\b"),
    pat!("private_key_block", Digital, Critical, 99, r"-----BEGIN (?:RSA |EC |OPENSSH )?PRIVATE KEY-----"),
    pat!("jwt_token", Digital, Critical, 90, r"\beyJ[A-Za-z0-9_-]+\.eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b"),
    pat!("oauth_token", Digital, High, 70, r"\b(?:ya29\.|1/)[A-Za-z0-9_\-]{20,}\b"),
    pat!("slack_token", Digital, Critical, 93, r"\bxox[baprs]-[A-Za-z0-9-]{10,48}\b"),
    pat!("github_token", Digital, Critical, 93, r"\bgh[pousr]_[A-Za-z0-9]{36,}\b"),
    pat!("password_in_url", Digital, Critical, 91, r"[a-zA-Z][a-zA-Z0-9+.\-]*://[^:/\s]+:[^@/\s]+@"),
    pat!("url_with_credentials", Digital, Critical, 91, r"https?://[^:/\s]+:[^@/\s]+@[^\s]+"),
    pat!("username_handle", Personal, Low, 15, r"@[A-Za-z0-9_]{3,30}\b"),
    pat!("full_name", Personal, Low, 5, r"\b[A-Z][a-z]+\s[A-Z][a-z]+\b"),
    pat!("vehicle_vin", Digital, Medium, 40, r"\b[A-HJ-NPR-Z0-9]{17}\b", ctx: &["vin", "vehicle identification"]),
    pat!("device_imei", Digital, Medium, 40, r"\b\d{15}\b", ctx: &["imei"]),
    pat!("bitcoin_address", Financial, High, 60, r"\b(?:bc1|[13])[A-Za-z0-9]{25,39}\b"),
    pat!("ethereum_address", Financial, High, 60, r"\b0x[A-Fa-f0-9]{40}\b"),
    pat!("swift_bic", Financial, High, 58, r"\b[A-Z]{6}[A-Z0-9]{2}(?:[A-Z0-9]{3})?\b", ctx: &["swift", "bic"]),
    pat!("credit_score", Financial, Medium, 40, r"\b[3-8]\d{2}\b", ctx: &["credit score", "fico"]),
    pat!("salary_amount", Financial, Medium, 38, r"\$\s?\d{2,3}(?:,\d{3})+(?:\.\d{2})?", ctx: &["salary", "compensation", "annual pay"]),
    pat!("tax_id_generic", Financial, High, 52, r"\b\d{2}-\d{7}\b", ctx: &["tax id", "taxpayer"]),
    pat!("discord_webhook", Digital, High, 70, r"https://discord(?:app)?\.com/api/webhooks/\d+/[A-Za-z0-9_\-]+"),
    pat!("twilio_sid", Digital, High, 70, r"\bAC[a-f0-9]{32}\b"),
    pat!("sendgrid_key", Digital, Critical, 90, r"\bSG\.[A-Za-z0-9_\-]{22}\.[A-Za-z0-9_\-]{43}\b"),
    pat!("stripe_key", Digital, Critical, 94, r"\b(?:sk|pk)_(?:live|test)_[A-Za-z0-9]{24,}\b"),
    pat!("gcp_api_key", Digital, Critical, 90, r"\bAIza[0-9A-Za-z\-_]{35}\b"),
    pat!("npm_token", Digital, High, 70, r"\bnpm_[A-Za-z0-9]{36}\b"),
    pat!("docker_auth_token", Digital, High, 65, r"\bdckr_pat_[A-Za-z0-9_\-]{20,}\b"),
    pat!("ssh_private_key_path", Digital, Medium, 20, r"/(?:home|root|Users)/[\w.\-]+/\.ssh/id_(?:rsa|ed25519|ecdsa)\b"),
    pat!("x509_cert_block", Digital, High, 70, r"-----BEGIN CERTIFICATE-----"),
    pat!("generic_high_entropy_secret", Digital, Medium, 25, r"\b[A-Za-z0-9_\-]{24,64}\b", ctx: &["secret", "token", "key", "credential"]),
];

static PATTERNS: Lazy<Result<Vec<CompiledPattern>, PiiError>> = Lazy::new(|| {
    DEFS.iter()
        .map(|def| {
            Regex::new(def.pattern)
                .map(|regex| CompiledPattern {
                    name: def.name,
                    category: def.category,
                    sensitivity: def.sensitivity,
                    priority: def.priority,
                    context_keywords: def.context_keywords,
                    validator: def.validator,
                    regex,
                })
                .map_err(|e| PiiError::PackInit(format!("{}: {e}", def.name)))
        })
        .collect()
});

pub fn all_patterns() -> Result<&'static [CompiledPattern], PiiError> {
    match &*PATTERNS {
        Ok(patterns) => Ok(patterns.as_slice()),
        Err(e) => Err(PiiError::PackInit(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_compiles() {
        assert!(all_patterns().is_ok());
    }

    #[test]
    fn no_pattern_matches_its_own_placeholder() {
        let patterns = all_patterns().unwrap();
        for p in patterns {
            let placeholder = format!("[{}]", p.name.to_uppercase());
            assert!(
                !p.regex.is_match(&placeholder),
                "pattern {} matches its own placeholder",
                p.name
            );
        }
    }
}
