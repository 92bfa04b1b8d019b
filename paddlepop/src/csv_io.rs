//! CSV persistence for party inputs and share outputs.
//!
//! The data format is deliberately plain: comma separators, no quoting, an
//! optional header row, `key_size` identifier columns followed by unsigned
//! 64-bit feature columns. Shares files are all-numeric and headerless.

use crate::errors::Error;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

/// Read a party's input table. Returns column-major keys and features.
pub fn read_data_file<P: AsRef<Path>>(
    path: P,
    key_size: usize,
    has_header: bool,
) -> Result<(Vec<Vec<String>>, Vec<Vec<u64>>), Error> {
    let reader = BufReader::new(File::open(path)?);
    let mut keys: Vec<Vec<String>> = vec![Vec::new(); key_size];
    let mut features: Vec<Vec<u64>> = Vec::new();

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line_idx == 0 && has_header {
            continue;
        }
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < key_size {
            return Err(Error::Deserialization(format!(
                "line {} has {} fields, expected at least {} key columns",
                line_idx + 1,
                fields.len(),
                key_size
            )));
        }
        let feature_count = fields.len() - key_size;
        if features.is_empty() {
            features = vec![Vec::new(); feature_count];
        } else if features.len() != feature_count {
            return Err(Error::Deserialization(format!(
                "line {} has {} feature columns, expected {}",
                line_idx + 1,
                feature_count,
                features.len()
            )));
        }
        for (column, field) in keys.iter_mut().zip(fields.iter()) {
            column.push(field.to_string());
        }
        for (column, field) in features.iter_mut().zip(fields[key_size..].iter()) {
            let value = field.trim().parse::<u64>().map_err(|e| {
                Error::Deserialization(format!("line {}: {}", line_idx + 1, e))
            })?;
            column.push(value);
        }
    }
    Ok((keys, features))
}

/// Write a shares table (column-major) as a headerless numeric CSV.
pub fn write_shares_file<P: AsRef<Path>>(path: P, shares: &[Vec<u64>]) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    let rows = shares.first().map_or(0, |column| column.len());
    for row in 0..rows {
        let line = shares
            .iter()
            .map(|column| column[row].to_string())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a shares table written by `write_shares_file`.
pub fn read_shares_file<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<u64>>, Error> {
    let (_, features) = read_data_file(path, 0, false)?;
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_roundtrip() {
        let dir = std::env::temp_dir().join(format!("paddlepop-csv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("data.csv");
        std::fs::write(&path, "id,phone,clicks\nalice,123,7\nbob,456,9\n").unwrap();
        let (keys, features) = read_data_file(&path, 2, true).unwrap();
        assert_eq!(keys, vec![vec!["alice", "bob"], vec!["123", "456"]]);
        assert_eq!(features, vec![vec![7, 9]]);

        let shares_path = dir.join("shares.csv");
        write_shares_file(&shares_path, &features).unwrap();
        assert_eq!(read_shares_file(&shares_path).unwrap(), features);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let dir = std::env::temp_dir().join(format!("paddlepop-csv-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.csv");
        std::fs::write(&path, "a,1\nb,2,3\n").unwrap();
        assert!(read_data_file(&path, 1, false).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
