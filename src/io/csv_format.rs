//! CSV report of daily balance aggregates
//!
//! The report is the replay run's output: one row per `(merchant, date)` with
//! columns `merchant_id,balance_date,total_credits,total_debits,net_balance`.
//!
//! All functions are pure (no I/O besides the given writer) for easy testing.

use std::io::Write;

use crate::types::{AggregatorError, BalanceAggregate};

/// Column names of the report
pub const REPORT_HEADER: [&str; 5] = [
    "merchant_id",
    "balance_date",
    "total_credits",
    "total_debits",
    "net_balance",
];

/// Write aggregates in CSV format
///
/// Aggregates are sorted by merchant id, then date, for deterministic output.
/// Amounts are written with two decimal places.
///
/// # Arguments
///
/// * `aggregates` - Aggregates to write, in any order
/// * `output` - Writer receiving the CSV
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(AggregatorError::IoError)` if a write error occurred
pub fn write_aggregates_csv(
    aggregates: &[BalanceAggregate],
    output: &mut dyn Write,
) -> Result<(), AggregatorError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record(REPORT_HEADER)?;

    let mut sorted: Vec<&BalanceAggregate> = aggregates.iter().collect();
    sorted.sort_by_key(|aggregate| aggregate.key());

    for aggregate in sorted {
        writer.write_record(&[
            aggregate.merchant_id().to_string(),
            aggregate.balance_date().to_string(),
            format!("{:.2}", aggregate.total_credits()),
            format!("{:.2}", aggregate.total_debits()),
            format!("{:.2}", aggregate.net_balance()),
        ])?;
    }

    writer.flush()?;

    Ok(())
}
