use serde::{Deserialize, Serialize};

pub type AnswerCode = i32;

pub const ANSWER_NO: AnswerCode = 0;
pub const ANSWER_YES: AnswerCode = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub repo: String,
    pub package: String,
    pub version: String,
}

/// A synchronous decision point raised by the engine mid-method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "question", content = "args")]
pub enum Question {
    InstallIgnorePkg {
        package: String,
    },
    ReplacePkg {
        old_repo: String,
        old_package: String,
        new_repo: String,
        new_package: String,
    },
    ConflictPkg {
        package: String,
        conflicting: String,
        reason: String,
    },
    RemovePkgs {
        packages: Vec<String>,
    },
    SelectProvider {
        dependency: String,
        providers: Vec<Provider>,
    },
    CorruptedPkg {
        file: String,
        error: String,
    },
    ImportKey {
        fingerprint: String,
        uid: String,
        created: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionKind {
    InstallIgnorePkg,
    ReplacePkg,
    ConflictPkg,
    RemovePkgs,
    SelectProvider,
    CorruptedPkg,
    ImportKey,
}

impl Question {
    pub fn kind(&self) -> QuestionKind {
        match self {
            Self::InstallIgnorePkg { .. } => QuestionKind::InstallIgnorePkg,
            Self::ReplacePkg { .. } => QuestionKind::ReplacePkg,
            Self::ConflictPkg { .. } => QuestionKind::ConflictPkg,
            Self::RemovePkgs { .. } => QuestionKind::RemovePkgs,
            Self::SelectProvider { .. } => QuestionKind::SelectProvider,
            Self::CorruptedPkg { .. } => QuestionKind::CorruptedPkg,
            Self::ImportKey { .. } => QuestionKind::ImportKey,
        }
    }

    /// Answer used when no informed choice exists.
    ///
    /// Yes/no questions default to "no". Provider selection defaults to the
    /// first provider, which is what the engine would pick on its own.
    pub fn default_answer(&self) -> AnswerCode {
        ANSWER_NO
    }

    /// Whether `code` is a meaningful answer for this question.
    pub fn accepts(&self, code: AnswerCode) -> bool {
        match self {
            Self::SelectProvider { providers, .. } => {
                usize::try_from(code).is_ok_and(|index| index < providers.len())
            }
            _ => code == ANSWER_NO || code == ANSWER_YES,
        }
    }

    pub fn prompt(&self) -> String {
        match self {
            Self::InstallIgnorePkg { package } => {
                format!("{package} is in IgnorePkg/IgnoreGroup. Install anyway?")
            }
            Self::ReplacePkg {
                old_repo,
                old_package,
                new_repo,
                new_package,
            } => format!("Replace {old_repo}/{old_package} with {new_repo}/{new_package}?"),
            Self::ConflictPkg {
                package,
                conflicting,
                reason,
            } => {
                if reason == package || reason == conflicting {
                    format!("{package} and {conflicting} are in conflict. Remove {conflicting}?")
                } else {
                    format!(
                        "{package} and {conflicting} are in conflict ({reason}). Remove {conflicting}?"
                    )
                }
            }
            Self::RemovePkgs { packages } => format!(
                "The following packages cannot be upgraded due to unresolvable dependencies: {}. Skip them for this upgrade?",
                packages.join(", ")
            ),
            Self::SelectProvider {
                dependency,
                providers,
            } => format!(
                "There are {} providers available for {dependency}. Select one:",
                providers.len()
            ),
            Self::CorruptedPkg { file, error } => {
                format!("File {file} is corrupted ({error}). Delete it?")
            }
            Self::ImportKey {
                fingerprint,
                uid,
                created,
            } => format!("Import PGP key {fingerprint}, \"{uid}\", created {created}?"),
        }
    }
}
