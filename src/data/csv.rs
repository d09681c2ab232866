use ::csv;
use nalgebra::DMatrix;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::fs::File;
use std::path::Path;
use super::Dataset;
use crate::error::UlcaError;

/// A dataset read from a delimited file, together with the column names and the
/// display name of each group.
#[derive(Debug, Clone)]
pub struct LabeledTable {

    pub data : Dataset,

    pub feature_names : Vec<String>,

    pub label_names : BTreeMap<usize, String>

}

/// Reads a comma-separated table with a header row. The column named label_col
/// holds the group of each row; every other column must be numeric. When all
/// labels are non-negative integers they are used directly (named "Label {i}");
/// otherwise distinct label strings are numbered in ascending order and keep
/// their original text as display name.
pub fn load_labeled_csv<P>(path : P, label_col : &str) -> Result<LabeledTable, UlcaError>
where
    P : AsRef<Path>
{
    let f = File::open(path)?;
    read_labeled_csv(f, label_col)
}

pub fn read_labeled_csv<R>(reader : R, label_col : &str) -> Result<LabeledTable, UlcaError>
where
    R : Read
{
    let mut csv_reader = csv::Reader::from_reader(reader);
    let header : Vec<String> = csv_reader.headers()?.iter().map(|h| h.trim().to_string() ).collect();
    let label_ix = header.iter().position(|h| h == label_col )
        .ok_or_else(|| UlcaError::InvalidSetting(format!("Missing label column '{}'", label_col)) )?;
    let feature_names : Vec<String> = header.iter()
        .enumerate()
        .filter(|(ix, _)| *ix != label_ix )
        .map(|(_, h)| h.clone() )
        .collect();

    let mut values = Vec::new();
    let mut raw_labels = Vec::new();
    for (row_ix, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() != header.len() {
            return Err(UlcaError::ShapeMismatch(format!(
                "Row {} has {} fields but header has {}",
                row_ix + 1,
                record.len(),
                header.len()
            )));
        }
        for (ix, field) in record.iter().enumerate() {
            if ix == label_ix {
                raw_labels.push(field.trim().to_string());
            } else {
                let v = field.trim().parse::<f64>().map_err(|_| {
                    UlcaError::InvalidSetting(format!(
                        "Non-numeric entry '{}' at row {}, column '{}'",
                        field,
                        row_ix + 1,
                        header[ix]
                    ))
                })?;
                values.push(v);
            }
        }
    }
    if raw_labels.is_empty() || feature_names.is_empty() {
        return Err(UlcaError::EmptyDataset);
    }

    let (y, label_names) = encode_labels(&raw_labels[..]);
    let x = DMatrix::from_row_slice(raw_labels.len(), feature_names.len(), &values[..]);
    let data = Dataset::new(x, y)?;
    Ok(LabeledTable { data, feature_names, label_names })
}

fn encode_labels(raw : &[String]) -> (Vec<usize>, BTreeMap<usize, String>) {
    let numeric : Option<Vec<usize>> = raw.iter().map(|l| l.parse::<usize>().ok() ).collect();
    match numeric {
        Some(y) => {
            let names = y.iter()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|l| (l, format!("Label {}", l)) )
                .collect();
            (y, names)
        },
        None => {
            let distinct : Vec<&String> = raw.iter().collect::<BTreeSet<_>>().into_iter().collect();
            let y = raw.iter()
                .map(|l| distinct.iter().position(|d| *d == l ).unwrap_or(0) )
                .collect();
            let names = distinct.iter()
                .enumerate()
                .map(|(ix, name)| (ix, name.to_string()) )
                .collect();
            (y, names)
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn reads_named_labels() {
        let content = "a,species,b\n1.0,setosa,2.0\n2.0,virginica,3.5\n3.0,setosa,1.0\n";
        let tbl = read_labeled_csv(content.as_bytes(), "species").unwrap();
        assert_eq!(tbl.feature_names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(tbl.data.y(), &[0, 1, 0]);
        assert_eq!(tbl.label_names[&1], "virginica");
        assert_eq!(tbl.data.x()[(1, 1)], 3.5);
    }

    #[test]
    fn reads_integer_labels() {
        let content = "label,x\n2,1.0\n0,2.0\n";
        let tbl = read_labeled_csv(content.as_bytes(), "label").unwrap();
        assert_eq!(tbl.data.y(), &[2, 0]);
        assert_eq!(tbl.label_names[&2], "Label 2");
    }

    #[test]
    fn rejects_non_numeric_features() {
        let content = "label,x\n0,abc\n";
        assert!(read_labeled_csv(content.as_bytes(), "label").is_err());
    }

}
