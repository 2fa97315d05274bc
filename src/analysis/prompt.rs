//! Analysis prompt
//!
//! The report template requested here is what the report parser expects:
//! one "ANOMALIE DÉTECTÉE" block per finding with labeled lines.

use crate::models::UploadedFile;

const REPORT_TEMPLATE: &str = r#"
**INSTRUCTIONS D'ANALYSE DÉTAILLÉE :**

**PREMIÈREMENT : ANALYSE GLOBALE**
Commencez par les indicateurs clés : chiffre d'affaire total, taux de vente moyen,
nombre total de transactions, stock moyen disponible, valeur totale du stock,
performance globale.

**ENSUITE : DÉTECTION DES ANOMALIES**
Pour CHAQUE fichier, identifiez précisément la localisation exacte (ligne, colonne,
cellule, feuille), la nature de l'erreur, son impact financier ou opérationnel et
une recommandation corrective.

Catégories à couvrir :
🔍 **ANOMALIES FINANCIÈRES :** écarts de caisse, montants encaissés incohérents avec
les ventes, transactions dupliquées ou manquantes, problèmes de rapprochement.
📊 **ERREURS DE STOCK :** stock théorique différent du stock physique, ruptures
critiques, mouvements anormaux, données manquantes.
💰 **ANOMALIES DE TARIFICATION :** prix incohérents ou aberrants, remises anormales,
variations de prix suspectes.
📈 **PERFORMANCE COMMERCIALE :** tendances anormales, opportunités d'optimisation.

**FORMAT DE RÉPONSE EXIGÉ**

Pour CHAQUE anomalie détectée, utilisez exactement cette structure :

🚨 **ANOMALIE DÉTECTÉE**
📁 Fichier : [Nom du fichier]
📍 Localisation : [Ligne X, Colonne Y, Feuille Z]
🔎 Description : [Description détaillée de l'anomalie]
💰 Impact : [Montant chiffré suivi de la devise, par exemple 250 000 MGA]
✅ Recommandation : [Action corrective spécifique]

Indiquez « critique » ou « urgent » dans la description lorsque l'anomalie l'exige,
« mineur » lorsqu'elle est sans conséquence notable.
Présentez les anomalies par ordre de criticité et terminez par un **RÉSUMÉ**.
"#;

/// Build the trailing instruction part of the request
pub fn build_analysis_prompt(files: &[UploadedFile], user_prompt: &str) -> String {
    let file_list = files
        .iter()
        .map(|f| format!("📄 {} ({:.2} MB)", f.file_name, f.size() as f64 / 1024.0 / 1024.0))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "SWIS MADAGASCAR - RAPPORT D'ANALYSE AUTOMATIQUE\n\nFICHIERS ANALYSÉS :\n{}\n{}",
        file_list, REPORT_TEMPLATE
    );

    let user_prompt = user_prompt.trim();
    if !user_prompt.is_empty() {
        prompt.push_str("\n**DEMANDE COMPLÉMENTAIRE DE L'UTILISATEUR :**\n");
        prompt.push_str(user_prompt);
        prompt.push('\n');
    }

    prompt
}

/// Thread title derived from the uploaded file names
pub fn thread_title(files: &[UploadedFile]) -> String {
    let names = files
        .iter()
        .map(|f| f.file_name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let title = if names.is_empty() {
        "Automatic file analysis".to_string()
    } else {
        format!("Analysis: {}", names)
    };

    if title.chars().count() > TITLE_MAX_CHARS {
        format!("{}...", title.chars().take(TITLE_MAX_CHARS).collect::<String>())
    } else {
        title
    }
}

const TITLE_MAX_CHARS: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            content_type: None,
            data: vec![0; 1024 * 1024],
        }
    }

    #[test]
    fn test_prompt_lists_files_and_user_request() {
        let prompt = build_analysis_prompt(&[upload("ventes.xlsx")], "  Vérifiez surtout mars  ");

        assert!(prompt.contains("📄 ventes.xlsx (1.00 MB)"));
        assert!(prompt.contains("ANOMALIE DÉTECTÉE"));
        assert!(prompt.ends_with("Vérifiez surtout mars\n"));
    }

    #[test]
    fn test_prompt_without_user_request() {
        let prompt = build_analysis_prompt(&[upload("a.csv")], "   ");
        assert!(!prompt.contains("DEMANDE COMPLÉMENTAIRE"));
    }

    #[test]
    fn test_thread_title_is_truncated() {
        let files: Vec<_> = (0..10).map(|i| upload(&format!("fichier_élevé_{}.csv", i))).collect();
        let title = thread_title(&files);

        assert!(title.starts_with("Analysis: fichier_élevé_0.csv"));
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), 53);

        assert_eq!(thread_title(&[upload("a.csv")]), "Analysis: a.csv");
    }
}
