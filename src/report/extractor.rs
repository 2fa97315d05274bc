//! Regex extraction of findings from free-text reports
//!
//! Reports are expected to follow the template requested in the analysis
//! prompt: one "ANOMALIE DÉTECTÉE" block per finding with labeled lines for
//! file, location, description, impact and recommendation. English labels
//! are accepted as well. Nothing here can fail: text that does not follow
//! the template simply yields fewer findings.

use super::amount::{parse_amount, round2};
use crate::models::{Amount, AnomalyCategory, AnomalyRecord, AnomalySummary, Severity, DEFAULT_CURRENCY};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::ops::Range;

lazy_static! {
    static ref ANOMALY_MARKER: Regex =
        Regex::new(r"(?i)anomal(?:ie|y)\s+d[ée]tect[ée](?:e|d)?").expect("anomaly marker regex");

    static ref FINANCIAL_MARKER: Regex =
        Regex::new(r"(?i)anomalies?\s+financi[eè]res?|financial\s+anomal(?:y|ies)")
            .expect("financial marker regex");

    static ref STOCK_MARKER: Regex =
        Regex::new(r"(?i)erreurs?\s+de\s+stock|anomalies?\s+de\s+stock|stock\s+(?:errors?|anomal(?:y|ies))")
            .expect("stock marker regex");

    static ref PRICING_MARKER: Regex =
        Regex::new(r"(?i)anomalies?\s+de\s+(?:tarification|prix)|pricing\s+anomal(?:y|ies)")
            .expect("pricing marker regex");

    /// "Impact", anything on the same line, then a currency-tagged amount
    static ref IMPACT_AMOUNT: Regex =
        Regex::new(&format!(r"(?i)\bimpact[^\n]*?(?:{})", CURRENCY_AMOUNT_PATTERN))
            .expect("impact amount regex");

    static ref CURRENCY_AMOUNT: Regex =
        Regex::new(&format!(r"(?i){}", CURRENCY_AMOUNT_PATTERN)).expect("currency amount regex");

    static ref FIRST_NUMBER: Regex =
        Regex::new(r"\d(?:[\d.,]|[ \x{a0}\x{202f}]\d)*").expect("number regex");

    /// Headers that close an anomaly block
    static ref SECTION_BOUNDARY: Regex = Regex::new(
        r"(?im)^[^\p{L}\p{N}\n]*(?:[ée]tape|step|r[ée]sum[ée]|summary|synth[èe]se|conclusion|analyse\s+globale|analyse\s+par\s+cat[ée]gorie|recommandations\s+g[ée]n[ée]rales|anomalies?\s+financi[eè]res?|erreurs?\s+de\s+stock|anomalies?\s+de\s+tarification|performance\s+commerciale)"
    )
    .expect("section boundary regex");

    static ref FILE_FIELD: Regex = field_regex(r"(?:fichier|file|source)");
    static ref LOCATION_FIELD: Regex = field_regex(r"(?:localisation|location|emplacement)");
    static ref DESCRIPTION_FIELD: Regex = field_regex(r"(?:description|nature)");
    static ref IMPACT_FIELD: Regex = field_regex(r"impact");
    static ref RECOMMENDATION_FIELD: Regex =
        field_regex(r"(?:recommandation|recommendation|action\s+corrective)");
}

/// Amount with its currency written either before (`$1,250`, `€ 300`) or
/// after (`450 000 MGA`) the number
const CURRENCY_AMOUNT_PATTERN: &str = concat!(
    r"(?P<prefix_currency>\bMGA|\bAriary|\bAr\b|\bEUR|€|\bUSD|\$)[ \t\x{a0}\x{202f}]*",
    r"(?P<prefix_value>\d(?:[\d.,]|[ \x{a0}\x{202f}]\d)*)",
    r"|(?P<value>\d(?:[\d.,]|[ \x{a0}\x{202f}]\d)*)[ \t\x{a0}\x{202f}]*",
    r"(?P<currency>MGA|Ariary|Ar\b|EUR|€|USD|\$)",
);

/// Labeled line: optional bullet/emoji, label, up to a few qualifier words, colon, value
fn field_regex(label: &str) -> Regex {
    Regex::new(&format!(r"(?im)^[^\p{{L}}\p{{N}}\n]*{}[^:\n]{{0,30}}:(.+)$", label))
        .expect("field regex")
}

const NEGATIONS: &[&str] = &["aucune", "pas d'", "no ", "zero ", "zéro "];

const FINANCIAL_KEYWORDS: &[&str] = &[
    "financ", "caisse", "encaiss", "montant", "chiffre d'affaire", "transaction",
    "rapprochement", "comptab", "facture", "paiement", "revenue", "cash", "payment", "invoice",
];

const STOCK_KEYWORDS: &[&str] = &[
    "stock", "inventaire", "inventory", "rupture", "entrepôt", "warehouse",
];

const PRICING_KEYWORDS: &[&str] = &[
    "prix", "tarif", "remise", "price", "pricing", "discount", "marge",
];

const HIGH_SEVERITY_KEYWORDS: &[&str] = &[
    "critique", "critical", "urgent", "immédiat", "immediate", "grave", "majeur", "major",
    "sévère", "severe",
];

const LOW_SEVERITY_KEYWORDS: &[&str] = &[
    "mineur", "minor", "faible", "léger", "légère", "small", "négligeable", "negligible",
];

pub const UNKNOWN_FILE: &str = "Unspecified file";
pub const UNKNOWN_LOCATION: &str = "Unspecified location";
pub const NO_DESCRIPTION: &str = "No description provided";
pub const NO_IMPACT: &str = "Not quantified";
pub const NO_RECOMMENDATION: &str = "No recommendation provided";

/// Aggregate counts and total impact of a report
pub fn extract_summary(text: &str) -> AnomalySummary {
    let total_anomalies = anomaly_markers(text).len();
    if total_anomalies == 0 {
        return AnomalySummary::default();
    }

    let mut total_impact = 0.0;
    let mut impact_currency: Option<String> = None;
    for caps in IMPACT_AMOUNT.captures_iter(text) {
        if let Some(amount) = tagged_amount(&caps) {
            total_impact += amount.value;
            impact_currency.get_or_insert(amount.currency);
        }
    }

    AnomalySummary {
        total_anomalies,
        financial_anomalies: FINANCIAL_MARKER.find_iter(text).count(),
        stock_anomalies: STOCK_MARKER.find_iter(text).count(),
        pricing_anomalies: PRICING_MARKER.find_iter(text).count(),
        total_impact: round2(total_impact),
        impact_currency: impact_currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        has_critical_issues: total_anomalies > 0,
    }
}

/// One record per anomaly block, in report order
pub fn extract_records(text: &str, source_files: &[String]) -> Vec<AnomalyRecord> {
    let markers = anomaly_markers(text);

    markers
        .iter()
        .enumerate()
        .map(|(i, marker)| {
            let next_marker = markers.get(i + 1).map(|m| m.start).unwrap_or(text.len());
            let boundary = SECTION_BOUNDARY
                .find_at(text, marker.end)
                .map(|m| m.start())
                .unwrap_or(text.len());
            let segment = &text[marker.end..next_marker.min(boundary)];
            parse_segment(segment, source_files)
        })
        .collect()
}

/// Marker positions, skipping negated mentions such as "aucune anomalie détectée"
fn anomaly_markers(text: &str) -> Vec<Range<usize>> {
    ANOMALY_MARKER
        .find_iter(text)
        .filter(|m| !is_negated(&text[..m.start()]))
        .map(|m| m.range())
        .collect()
}

fn is_negated(before: &str) -> bool {
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prefix = before[line_start..].to_lowercase();
    let prefix = prefix.trim_end();
    NEGATIONS.iter().any(|n| {
        let n = n.trim_end();
        prefix.ends_with(n) && prefix[..prefix.len() - n.len()]
            .chars()
            .last()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

fn parse_segment(segment: &str, source_files: &[String]) -> AnomalyRecord {
    let lowered = segment.to_lowercase();
    let description = capture_field(&DESCRIPTION_FIELD, segment);

    let source_file = match capture_field(&FILE_FIELD, segment) {
        Some(raw) => canonical_file_name(&raw, source_files),
        None if source_files.len() == 1 => source_files[0].clone(),
        None => UNKNOWN_FILE.to_string(),
    };

    let impact_text = capture_field(&IMPACT_FIELD, segment).unwrap_or_else(|| NO_IMPACT.to_string());

    AnomalyRecord {
        source_file,
        category: record_category(description.as_deref(), &impact_text),
        description: description.unwrap_or_else(|| NO_DESCRIPTION.to_string()),
        location: capture_field(&LOCATION_FIELD, segment)
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
        estimated_impact: impact_amount(&impact_text),
        impact_text,
        severity: infer_severity(&lowered),
        recommendation: capture_field(&RECOMMENDATION_FIELD, segment)
            .unwrap_or_else(|| NO_RECOMMENDATION.to_string()),
    }
}

fn capture_field(regex: &Regex, segment: &str) -> Option<String> {
    regex
        .captures(segment)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_matches(|c: char| c.is_whitespace() || c == '*').to_string())
        .filter(|v| !v.is_empty())
}

/// Map a mentioned file back onto an uploaded file name when possible
fn canonical_file_name(raw: &str, source_files: &[String]) -> String {
    let lowered = raw.to_lowercase();
    source_files
        .iter()
        .find(|name| lowered.contains(&name.to_lowercase()))
        .cloned()
        .unwrap_or_else(|| raw.trim_matches(|c| c == '"' || c == '`').to_string())
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// Category from the finding's own words: the description, then the impact
/// value. Labels and file names are left out.
fn record_category(description: Option<&str>, impact_text: &str) -> AnomalyCategory {
    let from_description = description
        .map(|d| infer_category(&d.to_lowercase()))
        .unwrap_or(AnomalyCategory::Other);
    if from_description != AnomalyCategory::Other {
        return from_description;
    }
    infer_category(&impact_text.to_lowercase())
}

/// First matching category wins: Financial, Stock, Pricing
fn infer_category(lowered: &str) -> AnomalyCategory {
    if contains_any(lowered, FINANCIAL_KEYWORDS) {
        AnomalyCategory::Financial
    } else if contains_any(lowered, STOCK_KEYWORDS) {
        AnomalyCategory::Stock
    } else if contains_any(lowered, PRICING_KEYWORDS) {
        AnomalyCategory::Pricing
    } else {
        AnomalyCategory::Other
    }
}

fn infer_severity(lowered: &str) -> Severity {
    if contains_any(lowered, HIGH_SEVERITY_KEYWORDS) {
        Severity::High
    } else if contains_any(lowered, LOW_SEVERITY_KEYWORDS) {
        Severity::Low
    } else {
        Severity::Medium
    }
}

/// Prefer a currency-tagged amount; otherwise the first number on the line
fn impact_amount(impact_text: &str) -> Amount {
    if let Some(amount) = CURRENCY_AMOUNT
        .captures(impact_text)
        .and_then(|caps| tagged_amount(&caps))
    {
        return amount;
    }

    let value = FIRST_NUMBER
        .find(impact_text)
        .and_then(|m| parse_amount(m.as_str()))
        .unwrap_or(0.0);

    Amount {
        value,
        currency: DEFAULT_CURRENCY.to_string(),
    }
}

fn tagged_amount(caps: &Captures) -> Option<Amount> {
    let (value, currency) = match (caps.name("prefix_value"), caps.name("prefix_currency")) {
        (Some(value), Some(currency)) => (value, currency),
        _ => (caps.name("value")?, caps.name("currency")?),
    };
    Some(Amount {
        value: parse_amount(value.as_str())?,
        currency: normalize_currency(currency.as_str()),
    })
}

fn normalize_currency(token: &str) -> String {
    match token.to_lowercase().as_str() {
        "mga" | "ar" | "ariary" => "MGA".to_string(),
        "eur" | "€" => "EUR".to_string(),
        "usd" | "$" => "USD".to_string(),
        other => other.to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_BLOCK_REPORT: &str = "\
**ANALYSE GLOBALE**
Chiffre d'affaire total : 12 400 000 MGA

🔍 **ANOMALIES FINANCIÈRES :**

🚨 **ANOMALIE DÉTECTÉE**
📁 Fichier : ventes_mars.xlsx
📍 Localisation : Ligne 45, Colonne D, Feuille \"Ventes\"
🔎 Description : Montant encaissé différent du total des articles
💰 Impact : 1 500 000 MGA
✅ Recommandation : Vérifier la saisie ligne 45 et corriger le montant

📊 **ERREURS DE STOCK :**

🚨 **ANOMALIE DÉTECTÉE**
📁 Fichier : stock_physique.csv
📍 Localisation : Lignes 23-25, Produit \"RX-456\"
🔎 Description : Stock physique (150 unités) différent du stock théorique (180 unités)
💰 Impact : 450000 MGA
✅ Recommandation : Audit immédiat du produit RX-456

**RÉSUMÉ**
Deux anomalies à traiter en priorité.
";

    fn files() -> Vec<String> {
        vec!["ventes_mars.xlsx".to_string(), "stock_physique.csv".to_string()]
    }

    #[test]
    fn test_summary_of_two_block_report() {
        let summary = extract_summary(TWO_BLOCK_REPORT);

        assert_eq!(summary.total_anomalies, 2);
        assert!(summary.financial_anomalies >= 1);
        assert!(summary.stock_anomalies >= 1);
        assert_eq!(summary.pricing_anomalies, 0);
        assert_eq!(summary.total_impact, 1_950_000.0);
        assert_eq!(summary.impact_currency, "MGA");
        assert!(summary.has_critical_issues);
    }

    #[test]
    fn test_records_of_two_block_report() {
        let records = extract_records(TWO_BLOCK_REPORT, &files());
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.source_file, "ventes_mars.xlsx");
        assert_eq!(first.category, AnomalyCategory::Financial);
        assert_eq!(first.location, "Ligne 45, Colonne D, Feuille \"Ventes\"");
        assert_eq!(first.estimated_impact.value, 1_500_000.0);
        assert_eq!(first.estimated_impact.currency, "MGA");
        assert_eq!(first.severity, Severity::Medium);
        assert_eq!(first.recommendation, "Vérifier la saisie ligne 45 et corriger le montant");

        let second = &records[1];
        assert_eq!(second.source_file, "stock_physique.csv");
        assert_eq!(second.category, AnomalyCategory::Stock);
        assert_eq!(second.estimated_impact.value, 450_000.0);
        assert_eq!(second.severity, Severity::High);
    }

    #[test]
    fn test_last_block_stops_at_summary_header() {
        let records = extract_records(TWO_BLOCK_REPORT, &files());
        assert!(!records[1].recommendation.contains("Deux anomalies"));
        assert_eq!(records[1].recommendation, "Audit immédiat du produit RX-456");
    }

    #[test]
    fn test_no_markers_yields_empty_results() {
        let text = "Les fichiers sont cohérents. Impact : 0 MGA. Rien à signaler.";

        assert_eq!(extract_summary(text), AnomalySummary::default());
        assert!(!extract_summary(text).has_critical_issues);
        assert!(extract_records(text, &files()).is_empty());
        assert!(extract_records("", &[]).is_empty());
    }

    #[test]
    fn test_negated_marker_is_not_counted() {
        let text = "Aucune anomalie détectée dans stock.csv.";
        assert_eq!(extract_summary(text).total_anomalies, 0);
        assert!(extract_records(text, &files()).is_empty());
    }

    #[test]
    fn test_record_count_matches_marker_count() {
        let block = "🚨 ANOMALY DETECTED\nFile: a.csv\nDescription: duplicated transaction\n\n";
        for n in 0..5 {
            let text = block.repeat(n);
            assert_eq!(extract_records(&text, &[]).len(), n);
            assert_eq!(extract_summary(&text).total_anomalies, n);
        }
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let text = "ANOMALIE DÉTECTÉE\nquelque chose cloche sans détails";

        let records = extract_records(text, &["unique.csv".to_string()]);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.source_file, "unique.csv");
        assert_eq!(record.location, UNKNOWN_LOCATION);
        assert_eq!(record.description, NO_DESCRIPTION);
        assert_eq!(record.impact_text, NO_IMPACT);
        assert_eq!(record.estimated_impact.value, 0.0);
        assert_eq!(record.recommendation, NO_RECOMMENDATION);
        assert_eq!(record.category, AnomalyCategory::Other);

        let records = extract_records(text, &files());
        assert_eq!(records[0].source_file, UNKNOWN_FILE);
    }

    #[test]
    fn test_english_labels_and_pricing_category() {
        let text = "\
🚨 **Anomaly detected**
- **File**: prices.csv
- **Location**: row 12
- **Description**: unit price is ten times the catalogue price
- **Impact**: 1,250.50 USD
- **Recommendation**: minor fix, correct the price list
";
        let records = extract_records(text, &[]);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.source_file, "prices.csv");
        assert_eq!(record.location, "row 12");
        assert_eq!(record.category, AnomalyCategory::Pricing);
        assert_eq!(record.severity, Severity::Low);
        assert_eq!(record.estimated_impact.value, 1250.5);
        assert_eq!(record.estimated_impact.currency, "USD");

        let summary = extract_summary(text);
        assert_eq!(summary.total_impact, 1250.5);
        assert_eq!(summary.impact_currency, "USD");
    }

    #[test]
    fn test_impact_prefers_currency_amount() {
        let amount = impact_amount("30 unités manquantes (valeur : 450 000 MGA)");
        assert_eq!(amount.value, 450_000.0);

        let amount = impact_amount("30 unités manquantes");
        assert_eq!(amount.value, 30.0);
        assert_eq!(amount.currency, "MGA");

        assert_eq!(impact_amount("inconnu").value, 0.0);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let first = (extract_summary(TWO_BLOCK_REPORT), extract_records(TWO_BLOCK_REPORT, &files()));
        let second = (extract_summary(TWO_BLOCK_REPORT), extract_records(TWO_BLOCK_REPORT, &files()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_category_ignores_labels_and_file_names() {
        let text = "\
🚨 **ANOMALIE DÉTECTÉE**
📁 Fichier : caisse_inventaire.xlsx
📍 Localisation : Feuille Stock, ligne 8
🔎 Description : Rupture de stock sur le produit RX-456
💰 Impact financier : 450 000 MGA
✅ Recommandation : Réapprovisionner
";
        let records = extract_records(text, &["caisse_inventaire.xlsx".to_string()]);
        assert_eq!(records[0].category, AnomalyCategory::Stock);
        assert_eq!(records[0].estimated_impact.value, 450_000.0);

        let text = "\
🚨 **ANOMALIE DÉTECTÉE**
📁 Fichier : transactions_mars.csv
🔎 Description : Remise de 80 % appliquée hors promotion
💰 Impact financier : 120 000 MGA
";
        let records = extract_records(text, &[]);
        assert_eq!(records[0].category, AnomalyCategory::Pricing);
    }

    #[test]
    fn test_category_falls_back_to_impact_value() {
        let text = "ANOMALIE DÉTECTÉE\n🔎 Description : Écart constaté\n💰 Impact : perte de stock de 12 unités\n";
        let records = extract_records(text, &[]);
        assert_eq!(records[0].category, AnomalyCategory::Stock);
    }

    #[test]
    fn test_currency_before_amount() {
        let amount = impact_amount("$1,250 de remboursement en double");
        assert_eq!(amount.value, 1250.0);
        assert_eq!(amount.currency, "USD");

        let amount = impact_amount("environ € 300");
        assert_eq!(amount.value, 300.0);
        assert_eq!(amount.currency, "EUR");

        let text = "\
🚨 Anomaly detected
- File: refunds.csv
- Description: refund paid twice
- Impact: $1,250
";
        let summary = extract_summary(text);
        assert_eq!(summary.total_impact, 1250.0);
        assert_eq!(summary.impact_currency, "USD");
        assert_eq!(extract_records(text, &[])[0].estimated_impact.currency, "USD");
    }
}
