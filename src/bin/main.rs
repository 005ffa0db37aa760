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

use chrono::Utc;
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use log::{LevelFilter, warn};
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use points_engine_rs::{EconomyError, Engine, OrderKind, PaymentMethod, UserId};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;

/// Points Engine - Replay an economy event log
///
/// Reads economy events from a CSV file, drives them through the engine,
/// and outputs the resulting user snapshots to stdout.
#[derive(Parser, Debug)]
#[command(name = "points-engine-rs")]
#[command(about = "Replays an economy event CSV through the points engine", long_about = None)]
struct Args {
    /// Path to CSV file with economy events
    ///
    /// Expected format: event,user,amount,package,method,code
    /// Example: cargo run -- events.csv > users.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Write the ledger audit trail to this file after the replay
    #[arg(long, value_name = "FILE")]
    audit: Option<PathBuf>,

    /// Log verbosity (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: LevelFilter,
}

fn main() {
    // Parse command line arguments
    let args = Args::parse();

    // Logs go to stderr; stdout carries the snapshot CSV.
    if let Err(e) = init_logging(args.log_level) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    // Open input file
    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    // Replay events from CSV
    let engine = match process_events(BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing events: {}", e);
            process::exit(1);
        }
    };

    // Write user snapshots to stdout
    if let Err(e) = write_users(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }

    // Optionally export the audit trail
    if let Some(path) = &args.audit {
        let file = match File::create(path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Error creating audit file '{}': {}", path.display(), e);
                process::exit(1);
            }
        };
        if let Err(e) = write_audit(&engine, file) {
            eprintln!("Error writing audit trail: {}", e);
            process::exit(1);
        }
    }
}

fn init_logging(level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}",
        )))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}

/// Raw CSV record matching the input format.
///
/// Fields: `event, user, amount, package, method, code`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    event: String,
    user: u64,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
    package: Option<String>,
    method: Option<String>,
    code: Option<String>,
}

/// One replayable economy event.
#[derive(Debug)]
enum EconomyEvent {
    Credit { user: UserId, amount: i64 },
    Debit { user: UserId, amount: i64 },
    Order { user: UserId, kind: OrderKind, cost: i64 },
    Purchase { user: UserId, package: String, method: PaymentMethod },
    Referral { user: UserId, code: String },
}

impl CsvRecord {
    /// Converts the CSV record to an economy event.
    ///
    /// Returns `None` for unknown events or missing required fields.
    fn into_event(self) -> Option<EconomyEvent> {
        let user = UserId(self.user);

        match self.event.to_lowercase().as_str() {
            "credit" => Some(EconomyEvent::Credit {
                user,
                amount: self.amount?,
            }),
            "debit" => Some(EconomyEvent::Debit {
                user,
                amount: self.amount?,
            }),
            "image" => Some(EconomyEvent::Order {
                user,
                kind: OrderKind::Image,
                cost: self.amount.unwrap_or(OrderKind::Image.default_cost()),
            }),
            "video" => Some(EconomyEvent::Order {
                user,
                kind: OrderKind::Video,
                cost: self.amount.unwrap_or(OrderKind::Video.default_cost()),
            }),
            "purchase" => {
                let package = self.package.filter(|p| !p.is_empty())?;
                let method = self.method?.parse().ok()?;
                Some(EconomyEvent::Purchase {
                    user,
                    package,
                    method,
                })
            }
            "referral" => {
                let code = self.code.filter(|c| !c.is_empty())?;
                Some(EconomyEvent::Referral { user, code })
            }
            _ => None,
        }
    }
}

/// Replay events from a CSV reader into a fresh engine.
///
/// Streaming parse; malformed rows and business-rule rejections are logged
/// and skipped, so one bad row never aborts a replay.
///
/// # CSV Format
///
/// Expected columns: `event, user, amount, package, method, code`
/// - `event`: credit, debit, image, video, purchase, referral
/// - `user`: external user key (u64)
/// - `amount`: points for credit/debit, order cost override for image/video
/// - `package`: package key for purchase events
/// - `method`: alipay, wechat, or usdt for purchase events
/// - `code`: referral code for referral events
///
/// # Example
///
/// ```csv
/// event,user,amount,package,method,code
/// credit,1,100,,,
/// image,1,,,,
/// purchase,2,,55,alipay,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_events<R: Read>(reader: R) -> Result<Engine, csv::Error> {
    let engine = Engine::new();
    apply_events(&engine, reader)?;
    Ok(engine)
}

/// Replay events from a CSV reader into an existing engine.
pub fn apply_events<R: Read>(engine: &Engine, reader: R) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " credit "
        .flexible(true) // Allow missing trailing fields
        .has_headers(true) // Skip first row as header
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                // Skip malformed rows
                warn!("skipping malformed row: {e}");
                continue;
            }
        };
        let Some(event) = record.into_event() else {
            warn!("skipping invalid event record");
            continue;
        };
        if let Err(e) = apply_event(engine, event) {
            warn!("skipping event: {e}");
        }
    }

    Ok(())
}

fn apply_event(engine: &Engine, event: EconomyEvent) -> Result<(), EconomyError> {
    let now = Utc::now();
    match event {
        EconomyEvent::Credit { user, amount } => {
            engine.get_or_create_user(user, now)?;
            engine.credit(user, amount, "manual credit", now)?;
        }
        EconomyEvent::Debit { user, amount } => {
            engine.get_or_create_user(user, now)?;
            engine.debit(user, amount, "manual debit", now)?;
        }
        EconomyEvent::Order { user, kind, cost } => {
            engine.get_or_create_user(user, now)?;
            engine.create_order(user, kind, cost, now)?;
        }
        EconomyEvent::Purchase { user, package, method } => {
            engine.get_or_create_user(user, now)?;
            let payment = engine.create_payment(user, &package, method, now)?;
            // The replay records settled purchases; confirm immediately.
            engine.complete_payment(&payment.payment_no, now, now)?;
        }
        // The referral path creates the subject itself so a brand-new user
        // still counts as a new-user attribution.
        EconomyEvent::Referral { user, code } => {
            engine.process_referral(&code, user, now)?;
        }
    }
    Ok(())
}

/// Write user snapshots to a CSV writer, lowest user key first.
///
/// # CSV Format
///
/// Columns: `user_id, points, tier, referral_code, referred_by,
/// attributed_at, created_at`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_users<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut users = engine.users();
    users.sort_by_key(|user| user.user_id);
    for user in users {
        wtr.serialize(&user)?;
    }

    // Flush to ensure all data is written
    wtr.flush()?;
    Ok(())
}

/// Write the ledger audit trail to a CSV writer in append order.
///
/// Draining consumes the global feed; per-user reconciliation data remains
/// available afterward.
pub fn write_audit<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for entry in engine.journal().drain() {
        wtr.serialize(entry.as_ref())?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use points_engine_rs::Tier;
    use std::io::Cursor;

    #[test]
    fn parse_credit_and_debit() {
        let csv = "event,user,amount,package,method,code\n\
                   credit,1,100,,,\n\
                   debit,1,30,,,\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        assert_eq!(engine.balance(&UserId(1)).unwrap(), 70);
        assert_eq!(engine.journal().entry_count(&UserId(1)), 2);
    }

    #[test]
    fn order_events_use_default_costs() {
        let csv = "event,user,amount,package,method,code\n\
                   credit,1,100,,,\n\
                   image,1,,,,\n\
                   video,1,,,,\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        // 100 - 5 - 20
        assert_eq!(engine.balance(&UserId(1)).unwrap(), 75);
    }

    #[test]
    fn order_event_with_cost_override() {
        let csv = "event,user,amount,package,method,code\n\
                   credit,1,100,,,\n\
                   image,1,8,,,\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        assert_eq!(engine.balance(&UserId(1)).unwrap(), 92);
    }

    #[test]
    fn purchase_credits_package_points() {
        let csv = "event,user,amount,package,method,code\n\
                   purchase,2,,55,alipay,\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        assert_eq!(engine.balance(&UserId(2)).unwrap(), 55);
    }

    #[test]
    fn purchase_with_unknown_package_is_skipped() {
        let csv = "event,user,amount,package,method,code\n\
                   purchase,2,,999,alipay,\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        // User was created but nothing was credited.
        assert_eq!(engine.balance(&UserId(2)).unwrap(), 0);
    }

    #[test]
    fn referral_event_awards_new_user_bonus() {
        let engine = Engine::new();
        let seed = "event,user,amount,package,method,code\n\
                    credit,1,10,,,\n";
        apply_events(&engine, Cursor::new(seed)).unwrap();

        let code = engine.get_user(&UserId(1)).unwrap().referral_code;
        let referral = format!(
            "event,user,amount,package,method,code\nreferral,2,,,,{code}\n"
        );
        apply_events(&engine, Cursor::new(referral)).unwrap();

        assert_eq!(engine.balance(&UserId(1)).unwrap(), 50);
        assert_eq!(
            engine.get_user(&UserId(2)).unwrap().referred_by,
            Some(UserId(1))
        );
    }

    #[test]
    fn referral_with_unknown_code_is_ignored() {
        let csv = "event,user,amount,package,method,code\n\
                   referral,2,,,,NOPE1234\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        assert!(engine.get_user(&UserId(2)).is_none());
    }

    #[test]
    fn insufficient_debit_does_not_abort_replay() {
        let csv = "event,user,amount,package,method,code\n\
                   credit,1,10,,,\n\
                   debit,1,999,,,\n\
                   credit,1,5,,,\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        assert_eq!(engine.balance(&UserId(1)).unwrap(), 15);
    }

    #[test]
    fn skip_malformed_rows() {
        let csv = "event,user,amount,package,method,code\n\
                   credit,1,100,,,\n\
                   not-an-event,zzz,,,\n\
                   credit,2,50,,,\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        assert_eq!(engine.balance(&UserId(1)).unwrap(), 100);
        assert_eq!(engine.balance(&UserId(2)).unwrap(), 50);
    }

    #[test]
    fn parse_with_whitespace() {
        let csv = "event,user,amount,package,method,code\n credit , 1 , 100 ,,,\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        assert_eq!(engine.balance(&UserId(1)).unwrap(), 100);
    }

    #[test]
    fn write_users_to_csv() {
        let csv = "event,user,amount,package,method,code\n\
                   credit,2,600,,,\n\
                   credit,1,100,,,\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        let mut output = Vec::new();
        write_users(&engine, &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.contains("user_id,points,tier"));
        // Sorted by user key.
        let user1 = output_str.find(",100,").unwrap();
        let user2 = output_str.find(",600,").unwrap();
        assert!(user1 < user2);
        assert_eq!(engine.tier(&UserId(2)).unwrap(), Tier::P2);
    }

    #[test]
    fn write_audit_exports_entries() {
        let csv = "event,user,amount,package,method,code\n\
                   credit,1,100,,,\n\
                   image,1,,,,\n";
        let engine = process_events(Cursor::new(csv)).unwrap();

        let mut output = Vec::new();
        write_audit(&engine, &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.contains("credit"));
        assert!(output_str.contains("charge"));
        assert!(engine.journal().is_empty());
    }
}
