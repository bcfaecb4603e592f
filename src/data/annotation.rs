//! Gene id to symbol mapping with derived hyperlinks

use std::collections::HashMap;

use serde::Deserialize;

/// Placeholder substituted by the gene id in link templates
pub const GENE_ID_PLACEHOLDER: &str = "{gene_id}";

/// One annotated gene
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneRecord {
    pub gene_id: String,
    pub symbol: String,
}

/// Reference annotation for all genes, loaded once per run
#[derive(Debug, Clone, Default)]
pub struct GeneAnnotation {
    symbols: HashMap<String, String>,
    link_template: String,
}

impl GeneAnnotation {
    /// Build from records; later duplicates of a gene id win
    pub fn new(records: Vec<GeneRecord>, link_template: &str) -> Self {
        let symbols = records.into_iter().map(|r| (r.gene_id, r.symbol)).collect();
        Self {
            symbols,
            link_template: link_template.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbol(&self, gene_id: &str) -> Option<&str> {
        self.symbols.get(gene_id).map(|s| s.as_str())
    }

    /// Hyperlink for a gene, or `None` when no template is configured
    pub fn link(&self, gene_id: &str) -> Option<String> {
        if self.link_template.is_empty() {
            return None;
        }
        Some(self.link_template.replace(GENE_ID_PLACEHOLDER, gene_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_and_link() {
        let ann = GeneAnnotation::new(
            vec![GeneRecord { gene_id: "ENSG1".into(), symbol: "XIST".into() }],
            "https://www.ensembl.org/id/{gene_id}",
        );
        assert_eq!(ann.symbol("ENSG1"), Some("XIST"));
        assert_eq!(ann.symbol("ENSG2"), None);
        assert_eq!(ann.link("ENSG1").unwrap(), "https://www.ensembl.org/id/ENSG1");
    }

    #[test]
    fn test_empty_template_has_no_link() {
        let ann = GeneAnnotation::new(vec![], "");
        assert!(ann.link("ENSG1").is_none());
        assert!(ann.is_empty());
    }
}
