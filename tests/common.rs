#![allow(dead_code)]

use std::collections::BTreeMap;

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{
    Rng,
    SeedableRng,
};

pub const HEADER: [&str; 5] = [
    "Sample:",
    "CD4+ | Freq. of Parent",
    "CD8+ | Freq. of Parent",
    "Lymphocytes | Count",
    "Dead | Freq. of Parent",
];

/// Rows that no identifier pattern accepts, as exported by the cytometer
/// software under the sample table.
pub const SUMMARY_ROWS: [&str; 3] = ["Mean", "SD", "invalid_no_numbers"];

/// Generated export plus the values needed to check the results.
pub struct DemoExport {
    pub csv:     String,
    pub n_rows:  usize,
    /// `(tissue, group) -> animals`
    pub animals: BTreeMap<(String, u32), Vec<u32>>,
    /// `(tissue, group) -> "CD4+ | Freq. of Parent"` values
    pub cd4:     BTreeMap<(String, u32), Vec<f64>>,
}

impl DemoExport {
    pub fn cd4_mean(
        &self,
        tissue: &str,
        group: u32,
    ) -> f64 {
        let values = &self.cd4[&(tissue.to_string(), group)];
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub struct DemoExportBuilder {
    rng:          StdRng,
    group_sizes:  Vec<u32>,
    tissues:      Vec<&'static str>,
    time_prefix:  Option<&'static str>,
    summary_rows: bool,
}

impl DemoExportBuilder {
    pub fn new(
        seed: u64,
        group_sizes: Vec<u32>,
    ) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            group_sizes,
            tissues: vec!["SP"],
            time_prefix: None,
            summary_rows: true,
        }
    }

    pub fn with_tissues(
        mut self,
        tissues: Vec<&'static str>,
    ) -> Self {
        self.tissues = tissues;
        self
    }

    pub fn with_time_prefix(
        mut self,
        prefix: &'static str,
    ) -> Self {
        self.time_prefix = Some(prefix);
        self
    }

    pub fn with_summary_rows(
        mut self,
        summary_rows: bool,
    ) -> Self {
        self.summary_rows = summary_rows;
        self
    }

    /// Two-decimal value, parsed back so expectations match the file.
    fn value(
        &mut self,
        low: f64,
        high: f64,
    ) -> f64 {
        let v: f64 = self.rng.gen_range(low..high);
        format!("{:.2}", v).parse().unwrap()
    }

    pub fn build(mut self) -> DemoExport {
        let mut lines = vec![HEADER.join(",")];
        let mut animals = BTreeMap::new();
        let mut cd4 = BTreeMap::new();
        let mut row = 0usize;

        for tissue in self.tissues.clone() {
            for (idx, size) in self.group_sizes.clone().into_iter().enumerate() {
                let group = idx as u32 + 1;
                for animal in 1..=size {
                    let well = format!("{}{}", (b'A' + (row % 16) as u8) as char, row % 12 + 1);
                    let id = format!(
                        "{}{}_{}_{}.{}",
                        self.time_prefix.unwrap_or_default(),
                        tissue,
                        well,
                        group,
                        animal
                    );
                    let cd4_value = self.value(5.0, 40.0);
                    let cd8_value = self.value(1.0, 20.0);
                    let count = self.rng.gen_range(1_000u32..50_000);
                    lines.push(format!("{},{},{},{},", id, cd4_value, cd8_value, count));

                    animals
                        .entry((tissue.to_string(), group))
                        .or_insert_with(Vec::new)
                        .push(animal);
                    cd4.entry((tissue.to_string(), group))
                        .or_insert_with(Vec::new)
                        .push(cd4_value);
                    row += 1;
                }
            }
        }
        if self.summary_rows {
            for label in SUMMARY_ROWS {
                lines.push(format!("{},1.0,1.0,1,", label));
            }
        }

        DemoExport {
            n_rows: lines.len() - 1,
            csv: lines.into_iter().join("\n") + "\n",
            animals,
            cd4,
        }
    }
}
