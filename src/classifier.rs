//! Pluggable expense category classification.
//!
//! Categorization is independent of the matcher: classifiers run in a
//! fixed, deterministic order and the first decisive stage wins. The
//! built-in chain tries keyword rules first, then the category history of
//! the same store, and falls back to [DEFAULT_CATEGORY].

use rusqlite::Connection;
use serde::Serialize;

/// The category used when no classifier stage can decide.
pub const DEFAULT_CATEGORY: &str = "雑費";

/// Keyword table for Japanese freelancer tax categories. First hit wins,
/// in table order.
const DEFAULT_KEYWORD_RULES: [(&str, &[&str]); 11] = [
    (
        "通信費",
        &["携帯", "Wi-Fi", "プロバイダ", "サーバー", "ドメイン", "SIM"],
    ),
    (
        "旅費交通費",
        &[
            "電車",
            "バス",
            "タクシー",
            "新幹線",
            "飛行機",
            "ETC",
            "Suica",
            "PASMO",
        ],
    ),
    (
        "消耗品費",
        &["文房具", "インク", "USB", "ケーブル", "マウス", "キーボード"],
    ),
    ("接待交際費", &["会食", "お中元", "お歳暮", "慶弔", "贈答"]),
    ("会議費", &["カフェ", "スタバ", "ドトール", "打ち合わせ"]),
    (
        "地代家賃",
        &["事務所", "コワーキング", "レンタルオフィス"],
    ),
    (
        "水道光熱費",
        &["電気", "ガス", "水道", "東京電力", "東京ガス"],
    ),
    (
        "広告宣伝費",
        &["Google広告", "SNS広告", "名刺", "チラシ"],
    ),
    (
        "外注費",
        &["デザイン依頼", "開発依頼", "翻訳", "Fiverr", "Lancers"],
    ),
    (
        "新聞図書費",
        &["書籍", "Kindle", "技術書", "サブスク"],
    ),
    (
        "研修費",
        &["セミナー", "勉強会", "Udemy", "オンライン講座"],
    ),
];

/// A category assignment produced by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// The tax-filing category.
    pub category: String,
    /// The tax-filing subcategory, if the classifier knows one.
    pub subcategory: Option<String>,
}

/// A single classification strategy.
pub trait Classifier {
    /// Classify an expense from its store name and a free-text summary of
    /// the purchased items. Returns `None` when this stage cannot decide.
    fn classify(&self, store_name: &str, items: &str) -> Option<Classification>;
}

/// Matches store name and items text against an ordered keyword table.
///
/// The first keyword contained in the combined text wins its category.
/// Keyword matching is case-insensitive; subcategories are never inferred
/// from keywords.
pub struct KeywordClassifier {
    rules: Vec<(String, Vec<String>)>,
}

impl KeywordClassifier {
    /// Create a classifier with the built-in keyword table.
    pub fn with_default_rules() -> Self {
        Self {
            rules: DEFAULT_KEYWORD_RULES
                .iter()
                .map(|(category, keywords)| {
                    (
                        (*category).to_owned(),
                        keywords.iter().map(|keyword| (*keyword).to_owned()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, store_name: &str, items: &str) -> Option<Classification> {
        let haystack = format!("{store_name} {items}").to_lowercase();

        for (category, keywords) in &self.rules {
            for keyword in keywords {
                if haystack.contains(&keyword.to_lowercase()) {
                    return Some(Classification {
                        category: category.clone(),
                        subcategory: None,
                    });
                }
            }
        }

        None
    }
}

/// Reuses the category of the most recent expense recorded for the same
/// store.
pub struct HistoryClassifier<'conn> {
    connection: &'conn Connection,
}

impl<'conn> HistoryClassifier<'conn> {
    /// Create a classifier backed by the given database connection.
    pub fn new(connection: &'conn Connection) -> Self {
        Self { connection }
    }
}

impl Classifier for HistoryClassifier<'_> {
    fn classify(&self, store_name: &str, _items: &str) -> Option<Classification> {
        let store_name = store_name.trim();
        if store_name.is_empty() {
            return None;
        }

        let result = self
            .connection
            .prepare(
                "SELECT category, subcategory FROM expense
                 WHERE store_name = :store_name AND category <> ''
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
            )
            .ok()?
            .query_row(&[(":store_name", &store_name)], |row| {
                Ok(Classification {
                    category: row.get(0)?,
                    subcategory: row.get(1)?,
                })
            });

        match result {
            Ok(classification) => {
                tracing::debug!(
                    "classified {:?} as {:?} from expense history",
                    store_name,
                    classification.category
                );
                Some(classification)
            }
            Err(_) => None,
        }
    }
}

/// Run classifiers in order and return the first decisive result, falling
/// back to [DEFAULT_CATEGORY] with no subcategory.
pub fn classify_with_fallback(
    classifiers: &[&dyn Classifier],
    store_name: &str,
    items: &str,
) -> Classification {
    for classifier in classifiers {
        if let Some(classification) = classifier.classify(store_name, items) {
            return classification;
        }
    }

    Classification {
        category: DEFAULT_CATEGORY.to_owned(),
        subcategory: None,
    }
}
