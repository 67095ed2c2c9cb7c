// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use jarpay::{Engine, FeeConfig, FeePayer, NewContribution, NewJar, PaymentMethod};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;

/// Batch import for collector-recorded contributions.
///
/// Reads offline cash/bank-transfer contributions from a CSV file, runs
/// them through the settlement engine, and writes per-jar totals to
/// stdout for reconciliation against the collector's books.
#[derive(Parser, Debug)]
#[command(name = "jarpay-import")]
#[command(about = "Imports collector-recorded contribution CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with contributions
    ///
    /// Expected format: jar,contributor,phone,method,amount
    /// Example: jarpay-import collections.csv > totals.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match import_contributions(BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error importing contributions: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_jar_totals(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `jar, contributor, phone, method, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    jar: String,
    contributor: String,
    phone: String,
    method: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
}

impl CsvRecord {
    /// Maps the method column to a payment method.
    ///
    /// Only collector-recorded methods are importable; momo and card
    /// settle through the gateway and have no place in an offline batch.
    fn payment_method(&self) -> Option<PaymentMethod> {
        match self.method.to_lowercase().as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "bank" | "bank_transfer" => Some(PaymentMethod::BankTransfer),
            _ => None,
        }
    }
}

/// Imports contributions from a CSV reader into a fresh engine.
///
/// Jars are created on first sight of their name, owned by an anonymous
/// collector user. Malformed rows and rejected contributions are skipped;
/// a batch import must not stop on one bad row.
///
/// # CSV Format
///
/// Expected columns: `jar, contributor, phone, method, amount`
/// - `jar`: Jar name (created on demand)
/// - `contributor`: Display name, may be empty
/// - `phone`: Contributor phone number
/// - `method`: `cash` or `bank_transfer`
/// - `amount`: Decimal amount
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is
/// invalid.
pub fn import_contributions<R: Read>(reader: R) -> Result<Engine, csv::Error> {
    let engine = Engine::new();
    let config = FeeConfig::default();
    let collector = engine.create_user("batch-collector".to_string(), None);
    let mut jars: HashMap<String, jarpay::JarId> = HashMap::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        };

        let Some(method) = record.payment_method() else {
            eprintln!("Skipping row with non-importable method '{}'", record.method);
            continue;
        };
        let Some(amount) = record.amount else {
            eprintln!("Skipping row with missing amount");
            continue;
        };

        let jar_id = match jars.get(&record.jar) {
            Some(id) => *id,
            None => {
                let id = engine
                    .create_jar(NewJar {
                        name: record.jar.clone(),
                        currency: "GHS".to_string(),
                        creator: collector,
                        who_pays_platform_fees: FeePayer::Contributor,
                        goal_amount: None,
                        deadline_unix: None,
                    })
                    .expect("collector user exists");
                jars.insert(record.jar.clone(), id);
                id
            }
        };

        let contributor_name = (!record.contributor.is_empty()).then(|| record.contributor.clone());
        if let Err(e) = engine.create_contribution(
            NewContribution {
                jar_id,
                amount,
                method,
                contributor_name,
                contributor_phone: Some(record.phone.clone()),
                collector: Some(collector),
                via_payment_link: false,
            },
            &config,
        ) {
            eprintln!("Skipping contribution to '{}': {}", record.jar, e);
        }
    }

    Ok(engine)
}

/// Per-jar output row.
#[derive(Debug, Serialize)]
struct TotalsRecord {
    jar: String,
    total: Decimal,
    contributions: u64,
}

/// Writes per-jar totals as CSV.
///
/// # CSV Format
///
/// Columns: `jar, total, contributions`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_jar_totals<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut rows: Vec<TotalsRecord> = engine
        .jars()
        .map(|entry| TotalsRecord {
            jar: entry.name(),
            total: entry.total_contributed_amount(),
            contributions: entry.completed_contribution_count(),
        })
        .collect();
    rows.sort_by(|a, b| a.jar.cmp(&b.jar));

    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    #[test]
    fn import_single_cash_row() {
        let csv = "jar,contributor,phone,method,amount\n\
                   Wedding,Ama,+233200000001,cash,100.00\n";
        let engine = import_contributions(Cursor::new(csv)).unwrap();

        assert_eq!(engine.transaction_count(), 1);
        let jar = engine.jars().next().unwrap();
        assert_eq!(jar.total_contributed_amount(), dec!(100.00));
    }

    #[test]
    fn rows_grouped_by_jar_name() {
        let csv = "jar,contributor,phone,method,amount\n\
                   Wedding,Ama,+233200000001,cash,100.00\n\
                   School,Kojo,+233200000002,cash,40.00\n\
                   Wedding,Esi,+233200000003,bank_transfer,60.00\n";
        let engine = import_contributions(Cursor::new(csv)).unwrap();

        assert_eq!(engine.jars().count(), 2);
        let mut output = Vec::new();
        write_jar_totals(&engine, &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Wedding,160.00,2"));
        assert!(output.contains("School,40.00,1"));
    }

    #[test]
    fn momo_rows_skipped() {
        let csv = "jar,contributor,phone,method,amount\n\
                   Wedding,Ama,+233200000001,momo,100.00\n\
                   Wedding,Esi,+233200000003,cash,50.00\n";
        let engine = import_contributions(Cursor::new(csv)).unwrap();

        assert_eq!(engine.transaction_count(), 1);
    }

    #[test]
    fn malformed_rows_skipped() {
        let csv = "jar,contributor,phone,method,amount\n\
                   Wedding,Ama,+233200000001,cash,not-a-number\n\
                   Wedding,Esi,+233200000003,cash,25.00\n";
        let engine = import_contributions(Cursor::new(csv)).unwrap();

        assert_eq!(engine.transaction_count(), 1);
    }

    #[test]
    fn whitespace_trimmed() {
        let csv = "jar,contributor,phone,method,amount\n Wedding , Ama , +233200000001 , cash , 75.00 \n";
        let engine = import_contributions(Cursor::new(csv)).unwrap();

        assert_eq!(engine.transaction_count(), 1);
        let jar = engine.jars().next().unwrap();
        assert_eq!(jar.total_contributed_amount(), dec!(75.00));
    }
}
