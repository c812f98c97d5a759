use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::error::DispatchError;
use crate::core::store::NewJob;

#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub id: i64,
    pub name: String,
    pub company: String,
    pub address: String,
    pub amount: String,
}

impl Recipient {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }
}

/// Filled in for `{amount}` when a recipient line has no amount column.
pub const DEFAULT_AMOUNT: &str = "0.00";

static RE_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s.\-]").unwrap());
static RE_SCIENTIFIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(?:\.(\d*))?[eE]\+?(\d+)$").unwrap());
static RE_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?\d{5,15}$").unwrap());

/// Strips separators and undoes the scientific notation spreadsheets apply to
/// long numbers (`1.38E+10` → `13800000000`).
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(cap) = RE_SCIENTIFIC.captures(trimmed) {
        let int_part = &cap[1];
        let frac_part = cap.get(2).map_or("", |m| m.as_str());
        if let Ok(exponent) = cap[3].parse::<usize>() {
            if exponent >= frac_part.len() {
                let mut digits = format!("{int_part}{frac_part}");
                digits.push_str(&"0".repeat(exponent - frac_part.len()));
                return digits;
            }
        }
    }
    RE_SEPARATORS.replace_all(trimmed, "").into_owned()
}

pub fn is_valid_address(address: &str) -> bool {
    RE_ADDRESS.is_match(address)
}

/// Reads `address[,name[,company[,amount]]]` lines. Blank lines and `#` comments are
/// skipped; an invalid address fails the whole file with its line number.
pub fn parse_recipients_file(path: &Path) -> Result<Vec<Recipient>, DispatchError> {
    let file = File::open(path)?;
    parse_recipients(BufReader::new(file))
}

pub fn parse_recipients<R: BufRead>(reader: R) -> Result<Vec<Recipient>, DispatchError> {
    let mut recipients = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut fields = trimmed.splitn(4, ',').map(str::trim);
        let address = normalize_address(fields.next().unwrap_or_default());
        if !is_valid_address(&address) {
            return Err(DispatchError::InvalidRecipients {
                message: format!("line {}: invalid address '{}'", idx + 1, trimmed),
            });
        }
        let name = fields.next().unwrap_or_default().to_string();
        let company = fields.next().unwrap_or_default().to_string();
        let amount = match fields.next() {
            Some(amount) if !amount.is_empty() => amount.to_string(),
            _ => DEFAULT_AMOUNT.to_string(),
        };

        recipients.push(Recipient {
            id: recipients.len() as i64 + 1,
            name,
            company,
            address,
            amount,
        });
    }

    if recipients.is_empty() {
        return Err(DispatchError::InvalidRecipients {
            message: "no recipients".to_string(),
        });
    }

    Ok(recipients)
}

/// Resolves `{name}`, `{company}`, `{amount}` and `{date}` for one recipient.
pub fn render_body(template: &str, recipient: &Recipient, date: &str) -> String {
    template
        .replace("{name}", recipient.display_name())
        .replace("{company}", &recipient.company)
        .replace("{amount}", &recipient.amount)
        .replace("{date}", date)
}

/// Materializes one job per recipient with its literal message text.
pub fn build_jobs(template: &str, recipients: &[Recipient], date: &str) -> Vec<NewJob> {
    recipients
        .iter()
        .map(|recipient| NewJob {
            recipient_id: recipient.id,
            recipient_name: recipient.display_name().to_string(),
            address: recipient.address.clone(),
            body: render_body(template, recipient, date),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;

    #[test]
    fn normalize_strips_separators() {
        assert_eq!(normalize_address(" 138-0000.0000 "), "13800000000");
        assert_eq!(normalize_address("138 0000 0000"), "13800000000");
    }

    #[test]
    fn normalize_expands_scientific_notation() {
        assert_eq!(normalize_address("1.38E+10"), "13800000000");
        assert_eq!(normalize_address("1.3800138E10"), "13800138000");
        assert_eq!(normalize_address("5e3"), "5000");
    }

    #[test]
    fn address_validation() {
        assert!(is_valid_address("13800000000"));
        assert!(is_valid_address("+4915112345678"));
        assert!(!is_valid_address("12ab"));
        assert!(!is_valid_address(""));
    }

    #[test]
    fn parses_lines_and_skips_comments() {
        let input = "# customers\n\n13800000001, Alice, Acme\n138-0000-0002,Bob\n13800000003\n";
        let recipients = parse_recipients(Cursor::new(input)).unwrap();

        assert_eq!(recipients.len(), 3);
        assert_eq!(recipients[0].name, "Alice");
        assert_eq!(recipients[0].company, "Acme");
        assert_eq!(recipients[1].address, "13800000002");
        assert_eq!(recipients[2].display_name(), "13800000003");
        let ids: Vec<_> = recipients.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn invalid_line_reports_its_number() {
        let input = "13800000001\n\nnot-a-number,Bob\n";
        let err = parse_recipients(Cursor::new(input)).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn empty_file_is_rejected() {
        assert!(parse_recipients(Cursor::new("# nothing\n")).is_err());
    }

    #[test]
    fn reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "13800000001,Alice").unwrap();
        let recipients = parse_recipients_file(file.path()).unwrap();
        assert_eq!(recipients[0].name, "Alice");
    }

    #[test]
    fn jobs_carry_resolved_text() {
        let recipients = parse_recipients(Cursor::new("13800000001,Alice,Acme\n13800000002\n")).unwrap();
        let jobs = build_jobs("Hi {name} of {company}, see you {date}", &recipients, "2026-10-18");

        assert_eq!(jobs[0].body, "Hi Alice of Acme, see you 2026-10-18");
        assert_eq!(jobs[1].body, "Hi 13800000002 of , see you 2026-10-18");
        assert_eq!(jobs[1].recipient_name, "13800000002");
    }

    #[test]
    fn amount_column_fills_placeholder_with_default() {
        let input = "13800000001,Alice,Acme,128.50\n13800000002,Bob\n";
        let recipients = parse_recipients(Cursor::new(input)).unwrap();
        assert_eq!(recipients[0].amount, "128.50");
        assert_eq!(recipients[1].amount, DEFAULT_AMOUNT);

        let jobs = build_jobs("{name} owes {amount} to {company}", &recipients, "2026-10-18");
        assert_eq!(jobs[0].body, "Alice owes 128.50 to Acme");
        assert_eq!(jobs[1].body, "Bob owes 0.00 to ");
    }
}
