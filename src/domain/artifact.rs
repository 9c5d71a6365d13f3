//! Downloadable documents derived from an assistant turn

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Kind of document to derive from the latest lesson plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Dossier,
    Handout,
    Presentation,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Dossier, ArtifactKind::Handout, ArtifactKind::Presentation];

    /// Format-specific instruction sent alongside the lesson plan
    pub fn instruction(&self) -> &'static str {
        match self {
            ArtifactKind::Dossier => {
                "Erstelle aus der folgenden Lektionsplanung ein vollständiges Unterrichtsdossier für die \
                 Lehrperson. Gliederung: Lernziele, Lehrplanbezug, Zeitplan mit Phasen, Material, \
                 Differenzierung, Beurteilung. Antworte ausschliesslich in Markdown."
            }
            ArtifactKind::Handout => {
                "Erstelle aus der folgenden Lektionsplanung ein Arbeitsblatt für die Schülerinnen und \
                 Schüler. Verwende eine klare, stufengerechte Sprache, nummerierte Aufgaben und Platz für \
                 Antworten. Keine Lösungen. Antworte ausschliesslich in Markdown."
            }
            ArtifactKind::Presentation => {
                "Erstelle aus der folgenden Lektionsplanung eine Präsentation mit 6 bis 10 Folien. Trenne \
                 die Folien mit einer Zeile '---', jede Folie beginnt mit einer Überschrift '# ' und \
                 enthält höchstens fünf kurze Stichpunkte."
            }
        }
    }

    pub fn file_stem(&self) -> &'static str {
        match self {
            ArtifactKind::Dossier => "dossier",
            ArtifactKind::Handout => "arbeitsblatt",
            ArtifactKind::Presentation => "praesentation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "dossier" => Some(ArtifactKind::Dossier),
            "handout" | "arbeitsblatt" => Some(ArtifactKind::Handout),
            "presentation" | "praesentation" | "slides" => Some(ArtifactKind::Presentation),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Dossier => write!(f, "dossier"),
            ArtifactKind::Handout => write!(f, "handout"),
            ArtifactKind::Presentation => write!(f, "presentation"),
        }
    }
}

/// Generated document ready for the export collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub filename: String,
    pub content: String,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, content: impl Into<String>) -> Self {
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        Self {
            kind,
            filename: format!("{}-{}.md", kind.file_stem(), timestamp),
            content: content.into(),
        }
    }
}
