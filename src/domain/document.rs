//! Document snapshot handed to step executors.
//!
//! The document itself is owned by an external collaborator (see
//! [`DocumentStore`](crate::executor::DocumentStore)); these types are the
//! minimal view executors read and the fields they write back.

use serde::{Deserialize, Serialize};

/// Section titles that are never drafted or polished as chapters.
const SPECIAL_SECTION_MARKERS: [&str; 6] = [
    "摘要",
    "abstract",
    "参考文献",
    "references",
    "致谢",
    "acknowledg",
];

/// A document under generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Scope identifier.
    pub id: String,
    /// Document title.
    pub title: String,
    /// Language code, `zh` or `en`.
    #[serde(default = "default_language")]
    pub language: String,
    /// Writing style hint.
    #[serde(default)]
    pub style: Option<String>,
    /// Target total length in characters.
    #[serde(default)]
    pub target_words: Option<u32>,
    /// Keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Top-level sections (level 0 and 1).
    #[serde(default)]
    pub sections: Vec<Section>,
}

fn default_language() -> String {
    "zh".to_string()
}

/// A section; level 0 is a special block, 1 a chapter, 2+ a subsection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Section identifier, e.g. `ch1` or `ch1.2`.
    pub id: String,
    /// Section title.
    pub title: String,
    /// Nesting level.
    pub level: u8,
    /// Target length in characters.
    #[serde(default)]
    pub target_words: Option<u32>,
    /// Writing notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Subsections.
    #[serde(default)]
    pub children: Vec<Section>,
    /// Figures placed in this section.
    #[serde(default)]
    pub figures: Vec<Figure>,
    /// Tables placed in this section.
    #[serde(default)]
    pub tables: Vec<Table>,
    /// First draft.
    #[serde(default)]
    pub draft: Option<String>,
    /// Polished text.
    #[serde(default)]
    pub final_text: Option<String>,
}

/// A figure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Figure {
    /// Figure identifier, e.g. `fig3-1`.
    pub id: String,
    /// Caption.
    pub caption: String,
    /// Path of the uploaded image, if any.
    #[serde(default)]
    pub path: Option<String>,
    /// Generated description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    /// Table identifier, e.g. `tab3-1`.
    pub id: String,
    /// Caption.
    pub caption: String,
    /// Raw uploaded content (CSV, spreadsheet dump, free text).
    #[serde(default)]
    pub source: Option<String>,
    /// Normalised Markdown content.
    #[serde(default)]
    pub content: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
}

impl Section {
    /// Returns `true` for abstract, references and acknowledgment blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use aiwrite_tasks::domain::Section;
    ///
    /// let refs = Section { id: "refs".into(), title: "References".into(), level: 0, ..Default::default() };
    /// assert!(refs.is_special());
    /// let ch = Section { id: "ch1".into(), title: "Introduction".into(), level: 1, ..Default::default() };
    /// assert!(!ch.is_special());
    /// ```
    pub fn is_special(&self) -> bool {
        let title = self.title.to_lowercase();
        SPECIAL_SECTION_MARKERS
            .iter()
            .any(|marker| title.contains(marker))
    }

    /// Target length: explicit target, else the children's targets (500
    /// each when unset), else 2000.
    pub fn effective_target_words(&self) -> u32 {
        if let Some(target) = self.target_words {
            return target;
        }
        if !self.children.is_empty() {
            return self
                .children
                .iter()
                .map(|c| c.target_words.unwrap_or(500))
                .sum();
        }
        2000
    }

    /// Best available text: polished, else draft.
    pub fn best_text(&self) -> Option<&str> {
        self.final_text.as_deref().or(self.draft.as_deref())
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Section>) {
        out.push(self);
        for child in &self.children {
            child.collect(out);
        }
    }
}

impl Document {
    /// Every section, depth first.
    pub fn all_sections(&self) -> Vec<&Section> {
        let mut out = Vec::new();
        for section in &self.sections {
            section.collect(&mut out);
        }
        out
    }

    /// Level-1 chapters.
    pub fn chapters(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.level == 1)
    }

    /// Finds a section anywhere in the tree.
    pub fn find_section(&self, id: &str) -> Option<&Section> {
        self.all_sections().into_iter().find(|s| s.id == id)
    }

    /// Every figure with the section it belongs to.
    pub fn all_figures(&self) -> Vec<(&Section, &Figure)> {
        self.all_sections()
            .into_iter()
            .flat_map(|s| s.figures.iter().map(move |f| (s, f)))
            .collect()
    }

    /// Every table with the section it belongs to.
    pub fn all_tables(&self) -> Vec<(&Section, &Table)> {
        self.all_sections()
            .into_iter()
            .flat_map(|s| s.tables.iter().map(move |t| (s, t)))
            .collect()
    }

    /// The Chinese abstract block (title contains 摘要 but not "abstract").
    pub fn abstract_cn(&self) -> Option<&Section> {
        self.sections.iter().find(|s| {
            let title = s.title.to_lowercase();
            title.contains("摘要") && !title.contains("abstract")
        })
    }

    /// The English abstract block.
    pub fn abstract_en(&self) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.title.to_lowercase().contains("abstract"))
    }

    /// Body text of every non-special chapter, for abstracts and export.
    pub fn body_text(&self) -> String {
        self.sections
            .iter()
            .filter(|s| !s.is_special())
            .filter_map(|s| s.best_text().map(|text| format!("## {}\n{}", s.title, text)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(id: &str, title: &str) -> Section {
        Section {
            id: id.to_string(),
            title: title.to_string(),
            level: 1,
            ..Default::default()
        }
    }

    #[test]
    fn special_sections_match_both_languages() {
        for title in ["摘要", "Abstract", "参考文献", "References", "致谢", "Acknowledgments"] {
            assert!(chapter("x", title).is_special(), "{title}");
        }
        assert!(!chapter("x", "Related Work").is_special());
    }

    #[test]
    fn target_words_fall_back_to_children_then_default() {
        let mut ch = chapter("ch1", "Intro");
        assert_eq!(ch.effective_target_words(), 2000);

        ch.children = vec![
            Section {
                target_words: Some(800),
                ..chapter("ch1.1", "a")
            },
            chapter("ch1.2", "b"),
        ];
        assert_eq!(ch.effective_target_words(), 1300);

        ch.target_words = Some(3000);
        assert_eq!(ch.effective_target_words(), 3000);
    }

    #[test]
    fn find_section_searches_children() {
        let mut ch = chapter("ch1", "Intro");
        ch.children.push(chapter("ch1.1", "Background"));
        let doc = Document {
            id: "P1".to_string(),
            sections: vec![ch],
            ..Default::default()
        };
        assert_eq!(doc.find_section("ch1.1").unwrap().title, "Background");
        assert!(doc.find_section("ch9").is_none());
    }

    #[test]
    fn abstract_blocks_are_told_apart() {
        let doc = Document {
            id: "P1".to_string(),
            sections: vec![
                Section {
                    level: 0,
                    ..chapter("abs", "摘要")
                },
                Section {
                    level: 0,
                    ..chapter("abs-en", "Abstract")
                },
            ],
            ..Default::default()
        };
        assert_eq!(doc.abstract_cn().unwrap().id, "abs");
        assert_eq!(doc.abstract_en().unwrap().id, "abs-en");
    }

    #[test]
    fn body_text_skips_special_sections() {
        let doc = Document {
            id: "P1".to_string(),
            sections: vec![
                Section {
                    draft: Some("summary".to_string()),
                    ..chapter("abs", "Abstract")
                },
                Section {
                    draft: Some("draft".to_string()),
                    final_text: Some("final".to_string()),
                    ..chapter("ch1", "Intro")
                },
            ],
            ..Default::default()
        };
        assert_eq!(doc.body_text(), "## Intro\nfinal");
    }
}
