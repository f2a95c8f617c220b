//! CSV antibody catalogs and their mapping onto stored catalog rows.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use core_types::{Antibody, NewAntibody};
use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use crate::primary::PrimaryAntibody;
use crate::secondary::{SecondaryAntibody, infer_mouse_subtype};
use crate::{ReagentError, Result};

fn normalize_header(name: &str) -> String {
    name.trim_start_matches('\u{feff}')
        .trim()
        .to_ascii_lowercase()
        .replace([' ', '.'], "_")
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| (normalize_header(h), i))
        .collect()
}

fn column(header_map: &HashMap<String, usize>, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| header_map.get(*alias).copied())
}

fn required(header_map: &HashMap<String, usize>, aliases: &[&'static str]) -> Result<usize> {
    column(header_map, aliases).ok_or(ReagentError::MissingColumn { column: aliases[0] })
}

fn field(record: &StringRecord, index: Option<usize>) -> String {
    index
        .and_then(|idx| record.get(idx))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ReagentError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

pub fn load_primaries(path: &Path) -> Result<Vec<PrimaryAntibody>> {
    read_primaries(open(path)?)
}

/// Rows without a name or host animal are skipped.
pub fn read_primaries<R: Read>(reader: R) -> Result<Vec<PrimaryAntibody>> {
    let mut rdr = csv_reader(reader);
    let header_map = build_header_map(rdr.headers()?);

    let name_col = required(&header_map, &["antibody"])?;
    let animal_col = required(&header_map, &["animal"])?;
    let conc_col = column(&header_map, &["concentration"]);
    let catalog_col = column(&header_map, &["catalogue_number", "catalog_number"]);
    let igg_col = column(&header_map, &["igg", "igg_subtype"]);

    let mut rows = Vec::new();
    for (row_idx, result) in rdr.records().enumerate() {
        let record = result?;
        let name = field(&record, Some(name_col));
        let animal = field(&record, Some(animal_col)).to_ascii_lowercase();
        if name.is_empty() || animal.is_empty() {
            debug!(row = row_idx + 2, "skipping incomplete primary antibody row");
            continue;
        }
        rows.push(PrimaryAntibody {
            name,
            concentration: field(&record, conc_col).parse().ok(),
            animal,
            catalog_number: field(&record, catalog_col),
            igg_subtype: field(&record, igg_col),
        });
    }
    Ok(rows)
}

pub fn load_secondaries(path: &Path) -> Result<Vec<SecondaryAntibody>> {
    read_secondaries(open(path)?)
}

/// Rows missing a name, host, target or fluorophore are skipped.
pub fn read_secondaries<R: Read>(reader: R) -> Result<Vec<SecondaryAntibody>> {
    let mut rdr = csv_reader(reader);
    let header_map = build_header_map(rdr.headers()?);

    let name_col = required(&header_map, &["secondary_antibody", "secondary_antibodies"])?;
    let raised_col = required(&header_map, &["raised_in"])?;
    let anti_col = required(&header_map, &["anti"])?;
    let fluor_col = required(&header_map, &["fluorophore"])?;
    let conc_col = column(&header_map, &["concentration"]);

    let mut rows = Vec::new();
    for (row_idx, result) in rdr.records().enumerate() {
        let record = result?;
        let name = field(&record, Some(name_col));
        let raised_in = field(&record, Some(raised_col));
        let anti = field(&record, Some(anti_col));
        let fluorophore = field(&record, Some(fluor_col));
        if name.is_empty() || raised_in.is_empty() || anti.is_empty() || fluorophore.is_empty() {
            debug!(row = row_idx + 2, "skipping incomplete secondary antibody row");
            continue;
        }
        let mut secondary = SecondaryAntibody::new(name, &raised_in, &anti, &fluorophore);
        secondary.concentration_text = field(&record, conc_col);
        rows.push(secondary);
    }
    Ok(rows)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl PrimaryAntibody {
    pub fn into_new_antibody(self) -> NewAntibody {
        NewAntibody {
            catalog_number: non_empty(&self.catalog_number),
            igg_subtype: non_empty(&self.igg_subtype),
            stock_concentration: self.concentration.map(|c| c.to_string()),
            ..NewAntibody::primary(self.name, self.animal)
        }
    }
}

impl From<&Antibody> for PrimaryAntibody {
    fn from(antibody: &Antibody) -> Self {
        Self {
            name: antibody.name.clone(),
            concentration: antibody
                .stock_concentration
                .as_deref()
                .and_then(crate::parse_fraction),
            animal: antibody.host_species.trim().to_ascii_lowercase(),
            catalog_number: antibody.catalog_number.clone().unwrap_or_default(),
            igg_subtype: antibody.igg_subtype.clone().unwrap_or_default(),
        }
    }
}

impl SecondaryAntibody {
    pub fn into_new_antibody(self) -> NewAntibody {
        NewAntibody {
            igg_subtype: non_empty(&self.mouse_subtype),
            stock_concentration: non_empty(&self.concentration_text),
            ..NewAntibody::secondary(self.name, self.raised_in, self.anti, self.fluorophore)
        }
    }
}

impl From<&Antibody> for SecondaryAntibody {
    fn from(antibody: &Antibody) -> Self {
        let subtype = antibody
            .igg_subtype
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| infer_mouse_subtype(&antibody.name).to_string());
        Self {
            name: antibody.name.clone(),
            concentration_text: antibody.stock_concentration.clone().unwrap_or_default(),
            raised_in: antibody.host_species.trim().to_ascii_lowercase(),
            anti: antibody
                .anti_species
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase(),
            fluorophore: antibody.fluorophore.clone().unwrap_or_default(),
            mouse_subtype: subtype,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const PRIMARIES: &str = "\u{feff}Antibody,Concentration,Animal,Catalogue Number,IgG\n\
        GFAP,0.002,Rabbit,Z0334,\n\
        NeuN,0.001,Mouse,MAB377,IgG1\n\
        ,0.001,Mouse,X,IgG1\n\
        Iba1,,Goat,ab5076,n/a\n";

    const SECONDARIES: &str = "Secondary Antibody,Concentration,Raised In,Anti,Fluorophore\n\
        Donkey anti-Rabbit 488,1/500,Donkey,Rabbit,A488\n\
        Goat anti-Mouse IgG1 Cy3,1/1000,Goat,Mouse,Cy3\n\
        Incomplete,1/500,Goat,,A647\n";

    #[test]
    fn reads_primaries_with_normalized_headers() {
        let rows = read_primaries(PRIMARIES.as_bytes()).expect("parse");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].name, "GFAP");
        assert_eq!(rows[0].animal, "rabbit");
        assert_eq!(rows[0].concentration, Some(0.002));
        assert_eq!(rows[1].igg_subtype, "IgG1");
        assert_eq!(rows[1].catalog_number, "MAB377");
        assert_eq!(rows[2].concentration, None);
    }

    #[test]
    fn reads_secondaries_and_infers_subtype() {
        let rows = read_secondaries(SECONDARIES.as_bytes()).expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].raised_in, "donkey");
        assert_eq!(rows[0].concentration_text, "1/500");
        assert_eq!(rows[1].mouse_subtype, "igg1");
    }

    #[test]
    fn missing_required_column_is_reported() {
        let err = read_primaries("Name,Host\nGFAP,rabbit\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ReagentError::MissingColumn { column: "antibody" }));
    }

    #[test]
    fn loads_catalog_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("primaries.csv");
        let mut file = File::create(&path).expect("create");
        file.write_all(PRIMARIES.as_bytes()).expect("write");
        drop(file);

        let rows = load_primaries(&path).expect("load");
        assert_eq!(rows.len(), 3);
        assert!(matches!(
            load_primaries(&dir.path().join("missing.csv")),
            Err(ReagentError::Io { .. })
        ));
    }

    #[test]
    fn catalog_rows_map_to_new_antibodies() {
        let rows = read_primaries(PRIMARIES.as_bytes()).expect("parse");
        let neun = rows[1].clone().into_new_antibody();
        assert!(!neun.is_secondary);
        assert_eq!(neun.host_species, "mouse");
        assert_eq!(neun.igg_subtype.as_deref(), Some("IgG1"));
        assert_eq!(neun.stock_concentration.as_deref(), Some("0.001"));

        let secondaries = read_secondaries(SECONDARIES.as_bytes()).expect("parse");
        let donkey = secondaries[0].clone().into_new_antibody();
        assert!(donkey.is_secondary);
        assert_eq!(donkey.anti_species.as_deref(), Some("rabbit"));
        assert_eq!(donkey.fluorophore.as_deref(), Some("A488"));
    }
}
