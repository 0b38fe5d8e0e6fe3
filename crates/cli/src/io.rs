//! Reads and writes the flat-file artifacts named in the external
//! interface: tolerant manual parsing for legacy-shaped inputs like
//! `tickers.txt`, `csv`-crate struct (de)serialization for the engine's
//! own canonical schemas.

use chrono::NaiveDate;
use domain::{Financials, LedgerRow, PortfolioResult, ScoredStock, SectorPe, Ticker};
use std::collections::HashMap;
use std::path::Path;

/// `Ticker,Name,Sector,Industry,BrokerName` with `#` comments; BrokerName
/// optional; rows whose Sector contains "Error" are excluded.
pub fn read_tickers_file(path: &Path) -> anyhow::Result<Vec<Ticker>> {
    let contents = std::fs::read_to_string(path)?;
    let mut tickers = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line_no == 0 && line.to_lowercase().starts_with("ticker,") {
            continue;
        }
        let cols: Vec<&str> = line.split(',').collect();
        if cols.len() < 3 {
            tracing::warn!(line_no, line, "malformed tickers.txt row, skipping");
            continue;
        }
        let symbol = cols[0].trim().to_string();
        let sector = cols[2].trim().to_string();
        let industry = cols.get(3).map(|s| s.trim().to_string()).unwrap_or_default();

        if sector.to_lowercase().contains("error") {
            continue;
        }

        tickers.push(Ticker { symbol, sector, industry });
    }

    Ok(tickers)
}

pub fn read_financials_db(path: &Path) -> anyhow::Result<HashMap<String, Financials>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut by_ticker: HashMap<String, Financials> = HashMap::new();
    for record in reader.deserialize::<Financials>() {
        match record {
            Ok(row) => {
                by_ticker.insert(row.ticker.clone(), row);
            }
            Err(e) => tracing::warn!(%e, "skipping malformed financials row"),
        }
    }
    Ok(by_ticker)
}

/// Merge `new_rows` into `FINANCIALS_DB_FILE`, deduped on `(Stock,
/// FetchDate)` keeping the latest write, and rewritten atomically —
/// the same load-merge-rewrite shape as `master_db::MasterDb::save`.
pub fn write_financials_db(path: &Path, new_rows: &[Financials]) -> anyhow::Result<()> {
    let fetch_date = |f: &Financials| f.last_updated.get(..10).unwrap_or(&f.last_updated).to_string();

    let mut by_key: HashMap<(String, String), Financials> = HashMap::new();
    if path.exists() {
        let mut reader = csv::Reader::from_path(path)?;
        for record in reader.deserialize::<Financials>() {
            match record {
                Ok(row) => {
                    let key = (row.ticker.clone(), fetch_date(&row));
                    by_key.insert(key, row);
                }
                Err(e) => tracing::warn!(%e, "skipping malformed financials row"),
            }
        }
    }
    for row in new_rows {
        let key = (row.ticker.clone(), fetch_date(row));
        by_key.insert(key, row.clone());
    }

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let tmp_dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new().prefix(".tmp_csv_").tempfile_in(tmp_dir)?;

    let mut rows: Vec<&Financials> = by_key.values().collect();
    rows.sort_by(|a, b| a.ticker.cmp(&b.ticker).then_with(|| fetch_date(a).cmp(&fetch_date(b))));
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;

    Ok(())
}

pub fn append_csv<T: serde::Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let write_header = !path.exists();
    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(std::fs::OpenOptions::new().create(true).append(true).open(path)?);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_scored_stocks(path: &Path, rows: &[ScoredStock]) -> anyhow::Result<()> {
    append_csv(path, rows)
}

/// Every scored-stock row belonging to the most recent `run_id` present in
/// the append-only scored-stocks DB.
pub fn read_latest_scored_stocks(path: &Path) -> anyhow::Result<Vec<ScoredStock>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize::<ScoredStock>() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!(%e, "skipping malformed scored-stock row"),
        }
    }
    let latest_run_id = rows.iter().map(|r| r.run_id.clone()).max();
    Ok(match latest_run_id {
        Some(run_id) => rows.into_iter().filter(|r| r.run_id == run_id).collect(),
        None => Vec::new(),
    })
}

pub fn write_sector_pe(path: &Path, rows: &[SectorPe]) -> anyhow::Result<()> {
    append_csv(path, rows)
}

/// CSV-flattened mirror of [`PortfolioResult`]: `stocks`/`weights` don't
/// fit a flat row, so they're joined into `;`-separated columns.
#[derive(serde::Serialize)]
struct PortfolioResultRow {
    run_id: String,
    timestamp: String,
    engine_version: String,
    min_stocks: usize,
    max_stocks: usize,
    stocks: String,
    weights: String,
    sharpe_ratio: f64,
    expected_return_annual_pct: f64,
    expected_volatility_annual_pct: f64,
}

pub fn write_portfolio_result(path: &Path, row: &PortfolioResult) -> anyhow::Result<()> {
    let flat = PortfolioResultRow {
        run_id: row.run_id.clone(),
        timestamp: row.timestamp.clone(),
        engine_version: row.engine_version.clone(),
        min_stocks: row.min_stocks,
        max_stocks: row.max_stocks,
        stocks: row.stocks.join(";"),
        weights: row.weights.iter().map(|w| format!("{w}")).collect::<Vec<_>>().join(";"),
        sharpe_ratio: row.sharpe_ratio,
        expected_return_annual_pct: row.expected_return_annual_pct,
        expected_volatility_annual_pct: row.expected_volatility_annual_pct,
    };
    append_csv(path, std::slice::from_ref(&flat))
}

/// `CORRELATION_MATRIX_FILE`: NxN correlation of `tickers`, with a header
/// row and an index column.
pub fn write_correlation_matrix(path: &Path, tickers: &[String], matrix: &[Vec<f64>]) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["".to_string()];
    header.extend(tickers.iter().cloned());
    writer.write_record(&header)?;
    for (i, row) in matrix.iter().enumerate() {
        let mut record = vec![tickers.get(i).cloned().unwrap_or_default()];
        record.extend(row.iter().map(|v| format!("{v}")));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// The ledger arrives from an external transaction-ingest collaborator
/// with its own column set (`transaction_id, portfolio, trade_date,
/// settlement_date, broker_document, ticker, side, quantity, unit_price,
/// gross_value, allocated_fees, total_cost, net_cash_flow,
/// effective_price`); only the columns this pipeline needs are pulled out
/// by name, tolerant-manual-indexing style, rather than a direct struct
/// deserialize (whose field names don't match the external schema).
pub fn read_ledger(path: &Path) -> anyhow::Result<Vec<LedgerRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let col = |name: &str| headers.iter().position(|h| h == name);

    let (Some(date_idx), Some(ticker_idx), Some(side_idx), Some(qty_idx), Some(price_idx)) =
        (col("trade_date"), col("ticker"), col("side"), col("quantity"), col("unit_price"))
    else {
        anyhow::bail!("ledger file '{}' is missing required columns", path.display());
    };
    let fees_idx = col("allocated_fees");

    let mut rows = Vec::new();
    for (line_no, record) in reader.records().enumerate() {
        let record = record?;
        let parsed = (|| -> Option<LedgerRow> {
            let trade_date = NaiveDate::parse_from_str(record.get(date_idx)?, "%Y-%m-%d").ok()?;
            let ticker = record.get(ticker_idx)?.to_string();
            let side = match record.get(side_idx)?.trim().to_uppercase().as_str() {
                "BUY" => domain::Side::Buy,
                "SELL" => domain::Side::Sell,
                _ => return None,
            };
            let quantity = record.get(qty_idx)?.parse::<f64>().ok()?;
            let price = record.get(price_idx)?.parse::<f64>().ok()?;
            let fees = fees_idx.and_then(|i| record.get(i)).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
            Some(LedgerRow { trade_date, ticker, side, quantity, price, fees })
        })();

        match parsed {
            Some(row) => rows.push(row),
            None => tracing::warn!(line_no, "skipping malformed ledger row"),
        }
    }
    Ok(rows)
}

/// FIFO-lot positions derived from the ledger: each BUY appends a
/// `(qty, unit_cost)` lot; each SELL consumes lots oldest-first, creating
/// a negative lot if it sells beyond what's held. `net_qty` is the sum of
/// remaining lot quantities; `avg_cost` is the quantity-weighted cost of
/// the positive lots only, reported as 0 once net_qty drops to zero or
/// below.
pub fn positions_from_ledger(ledger: &[LedgerRow]) -> Vec<domain::Position> {
    use std::collections::VecDeque;

    let mut sorted = ledger.to_vec();
    sorted.sort_by_key(|r| r.trade_date);

    let mut lots: HashMap<String, VecDeque<(f64, f64)>> = HashMap::new();

    for row in &sorted {
        let ticker_lots = lots.entry(row.ticker.clone()).or_default();
        match row.side {
            domain::Side::Buy => {
                let unit_cost = row.price + row.fees / row.quantity;
                ticker_lots.push_back((row.quantity, unit_cost));
            }
            domain::Side::Sell => {
                let mut remaining = row.quantity;
                while remaining > 1e-9 {
                    match ticker_lots.front_mut() {
                        Some((lot_qty, _)) if *lot_qty > remaining => {
                            *lot_qty -= remaining;
                            remaining = 0.0;
                        }
                        Some((lot_qty, _)) => {
                            remaining -= *lot_qty;
                            ticker_lots.pop_front();
                        }
                        None => {
                            ticker_lots.push_back((-remaining, row.price));
                            remaining = 0.0;
                        }
                    }
                }
            }
        }
    }

    lots.into_iter()
        .map(|(ticker, ticker_lots)| {
            let net_qty: f64 = ticker_lots.iter().map(|(q, _)| q).sum();
            let avg_cost = if net_qty > 1e-9 {
                let positive_basis: f64 = ticker_lots.iter().filter(|(q, _)| *q > 0.0).map(|(q, c)| q * c).sum();
                let positive_qty: f64 = ticker_lots.iter().filter(|(q, _)| *q > 0.0).map(|(q, _)| q).sum();
                if positive_qty > 1e-9 { positive_basis / positive_qty } else { 0.0 }
            } else {
                0.0
            };
            domain::Position { ticker, net_qty, avg_cost }
        })
        .filter(|p| p.net_qty.abs() > 1e-9)
        .collect()
}

/// `N`-day momentum (pct change) per ticker, grounded in `portfolio_math::momentum`.
pub fn momentum_by_ticker(
    master_db: &master_db::MasterDb,
    tickers: &[String],
    window_days: usize,
) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    for ticker in tickers {
        let rows = master_db.rows_for(ticker);
        let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
        if let Some(m) = portfolio_math::momentum(&closes, window_days) {
            out.insert(ticker.clone(), m);
        }
    }
    out
}

pub fn prices_by_ticker(master_db: &master_db::MasterDb, tickers: &[String]) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    for ticker in tickers {
        if let Some(last) = master_db.rows_for(ticker).last() {
            out.insert(ticker.clone(), last.close);
        }
    }
    out
}

pub fn closes_series(master_db: &master_db::MasterDb, ticker: &str) -> Vec<(NaiveDate, f64)> {
    master_db.rows_for(ticker).iter().map(|r| (r.date, r.close)).collect()
}

/// Daily returns of the ledger-derived holdings value, used to resolve
/// the holdings Sharpe ratio from the actual position history rather
/// than leaving it at 0 (see the optimizer's ledger-equity-curve choice).
/// For every date spanned by any held ticker's price history, sums
/// `running_qty(ticker, date) * close(ticker, date)` across tickers,
/// where `running_qty` is the net position from ledger trades up to and
/// including that date.
pub fn holdings_daily_returns(ledger: &[LedgerRow], master_db: &master_db::MasterDb) -> Vec<f64> {
    use std::collections::BTreeSet;

    let tickers: std::collections::BTreeSet<String> = ledger.iter().map(|r| r.ticker.clone()).collect();
    if tickers.is_empty() {
        return Vec::new();
    }

    let mut sorted_ledger = ledger.to_vec();
    sorted_ledger.sort_by_key(|r| r.trade_date);

    let mut all_dates: BTreeSet<NaiveDate> = BTreeSet::new();
    let mut per_ticker_closes: HashMap<String, Vec<(NaiveDate, f64)>> = HashMap::new();
    for ticker in &tickers {
        let series = closes_series(master_db, ticker);
        all_dates.extend(series.iter().map(|(d, _)| *d));
        per_ticker_closes.insert(ticker.clone(), series);
    }

    let mut dates: Vec<NaiveDate> = all_dates.into_iter().collect();
    dates.retain(|d| *d >= sorted_ledger[0].trade_date);

    let mut values = Vec::with_capacity(dates.len());
    for date in &dates {
        let mut value = 0.0;
        for ticker in &tickers {
            let qty: f64 = sorted_ledger
                .iter()
                .filter(|r| &r.ticker == ticker && r.trade_date <= *date)
                .map(|r| match r.side {
                    domain::Side::Buy => r.quantity,
                    domain::Side::Sell => -r.quantity,
                })
                .sum();
            if qty <= 1e-9 {
                continue;
            }
            let price = per_ticker_closes
                .get(ticker)
                .and_then(|series| series.iter().rev().find(|(d, _)| d <= date).map(|(_, p)| *p))
                .unwrap_or(0.0);
            value += qty * price;
        }
        values.push(value);
    }

    let values: Vec<f64> = values.into_iter().skip_while(|v| *v <= 0.0).collect();
    portfolio_math::daily_returns(&values)
}
