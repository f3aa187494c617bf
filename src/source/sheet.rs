use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use super::MarketDataSource;
use crate::types::{now, Company, PriceOverride};

/// Live source reading the CSV export of a published spreadsheet.
///
/// Companies sheet:
/// | symbol | name | initial_price | trend | volatility | description (optional) |
///
/// Overrides sheet:
/// | symbol | override_price | timestamp (optional) |
///
/// The first row of each sheet is a header and is skipped.
pub struct SheetSource {
    companies_url: String,
    overrides_url: Option<String>,
    client: reqwest::blocking::Client,
}

impl SheetSource {
    pub fn new(companies_url: impl Into<String>, overrides_url: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build spreadsheet client")?;

        Ok(Self {
            companies_url: companies_url.into(),
            overrides_url,
            client,
        })
    }

    fn fetch(&self, url: &str) -> Result<String> {
        let body = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to reach spreadsheet at {}", url))?
            .error_for_status()?
            .text()?;
        Ok(body)
    }
}

fn csv_reader<R: Read>(rdr: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(rdr)
}

/// Rows that are short or fail to parse are logged and skipped, they never fail the whole sheet.
pub fn parse_companies<R: Read>(rdr: R) -> Vec<Company> {
    let mut companies = Vec::new();
    //Row numbers as they appear in the spreadsheet, the header is row 1
    for (i, row) in csv_reader(rdr).records().enumerate() {
        let row_number = i + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                error!("SOURCE: Error reading company row {}: {}, skipping", row_number, e);
                continue;
            }
        };

        if row.len() < 5 {
            warn!("SOURCE: Row {} has insufficient columns, skipping", row_number);
            continue;
        }

        let parsed = (
            row[2].parse::<f64>(),
            row[3].parse::<f64>(),
            row[4].parse::<f64>(),
        );
        match parsed {
            (Ok(initial_price), Ok(drift), Ok(volatility)) => {
                let description = row.get(5).unwrap_or_default();
                let company = Company::new(&row[0], &row[1], initial_price, drift, volatility)
                    .with_description(description);
                debug!("SOURCE: Loaded company {} - {}", company.symbol, company.name);
                companies.push(company);
            }
            _ => {
                error!("SOURCE: Error parsing numbers in company row {}, skipping", row_number);
            }
        }
    }
    companies
}

pub fn parse_overrides<R: Read>(rdr: R) -> Vec<PriceOverride> {
    let mut overrides = Vec::new();
    for (i, row) in csv_reader(rdr).records().enumerate() {
        let row_number = i + 2;
        let Ok(row) = row else {
            error!("SOURCE: Error reading override row {}, skipping", row_number);
            continue;
        };

        //Symbol and price are the minimum, blank rows are common in the sheet
        if row.len() < 2 || row[0].is_empty() {
            continue;
        }

        let Ok(price) = row[1].parse::<f64>() else {
            error!("SOURCE: Error parsing override price in row {}, skipping", row_number);
            continue;
        };

        let timestamp = row
            .get(2)
            .filter(|s| !s.is_empty())
            .and_then(parse_timestamp)
            .unwrap_or_else(now);

        debug!("SOURCE: Loaded override {} = {:.2}", &row[0], price);
        overrides.push(PriceOverride {
            symbol: row[0].to_string(),
            price,
            timestamp,
        });
    }
    overrides
}

fn parse_timestamp(value: &str) -> Option<i64> {
    if let Ok(date) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(date.unix_timestamp());
    }
    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(value, naive)
        .ok()
        .map(|date| date.assume_utc().unix_timestamp())
}

impl MarketDataSource for SheetSource {
    fn name(&self) -> &str {
        "sheet"
    }

    fn load_companies(&self) -> Result<Vec<Company>> {
        let body = self.fetch(&self.companies_url)?;
        let companies = parse_companies(body.as_bytes());
        info!("SOURCE: Loaded {} companies from spreadsheet", companies.len());
        Ok(companies)
    }

    fn load_overrides(&self) -> Result<Vec<PriceOverride>> {
        let Some(url) = &self.overrides_url else {
            return Ok(Vec::new());
        };
        let body = self.fetch(url)?;
        let overrides = parse_overrides(body.as_bytes());
        info!("SOURCE: Loaded {} price overrides from spreadsheet", overrides.len());
        Ok(overrides)
    }
}
