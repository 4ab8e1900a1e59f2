use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// One entry of the prepared transaction computed by `GetPackages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageChange {
    pub name: String,
    #[serde(default)]
    pub old_version: Option<String>,
    #[serde(default)]
    pub new_version: Option<String>,
    #[serde(default)]
    pub old_size: u64,
    #[serde(default)]
    pub new_size: u64,
    #[serde(default)]
    pub dl_size: u64,
    #[serde(default)]
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Install,
    Upgrade,
    Reinstall,
    Downgrade,
    Remove,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Reinstall => "reinstall",
            Self::Downgrade => "downgrade",
            Self::Remove => "remove",
        }
    }
}

impl PackageChange {
    pub fn kind(&self) -> ChangeKind {
        match (self.old_version.as_deref(), self.new_version.as_deref()) {
            (None, _) => ChangeKind::Install,
            (Some(_), None) => ChangeKind::Remove,
            (Some(old), Some(new)) => match vercmp(new, old) {
                Ordering::Greater => ChangeKind::Upgrade,
                Ordering::Equal => ChangeKind::Reinstall,
                Ordering::Less => ChangeKind::Downgrade,
            },
        }
    }

    /// Size used for progress accounting; removals have no new size and are
    /// accounted by what they free.
    pub fn accounted_size(&self) -> u64 {
        if self.new_size == 0 {
            self.old_size
        } else {
            self.new_size
        }
    }

    /// Change in installed size once the transaction is committed.
    pub fn size_delta(&self) -> i64 {
        self.new_size as i64 - self.old_size as i64
    }

    /// `name-version` stem that prefixes this package's download file name.
    pub fn file_stem(&self) -> Option<String> {
        self.new_version
            .as_ref()
            .map(|version| format!("{}-{version}", self.name))
    }
}

/// Compares two package versions (`[epoch:]version[-release]`) the way the
/// package manager orders them.
pub fn vercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let (epoch_a, version_a, release_a) = split_evr(a);
    let (epoch_b, version_b, release_b) = split_evr(b);

    let mut ordering = segment_cmp(epoch_a, epoch_b);
    if ordering == Ordering::Equal {
        ordering = segment_cmp(version_a, version_b);
        if ordering == Ordering::Equal {
            if let (Some(release_a), Some(release_b)) = (release_a, release_b) {
                ordering = segment_cmp(release_a, release_b);
            }
        }
    }
    ordering
}

fn split_evr(evr: &str) -> (&str, &str, Option<&str>) {
    let digits = evr.bytes().take_while(u8::is_ascii_digit).count();
    let (epoch, rest) = match evr.as_bytes().get(digits) {
        Some(b':') if digits == 0 => ("0", &evr[1..]),
        Some(b':') => (&evr[..digits], &evr[digits + 1..]),
        _ => ("0", evr),
    };

    match rest.rsplit_once('-') {
        Some((version, release)) => (epoch, version, Some(release)),
        None => (epoch, rest, None),
    }
}

fn segment_cmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let one = a.as_bytes();
    let two = b.as_bytes();
    let (mut i, mut j) = (0_usize, 0_usize);
    let (mut seg_end_one, mut seg_end_two) = (0_usize, 0_usize);

    while i < one.len() && j < two.len() {
        while i < one.len() && !one[i].is_ascii_alphanumeric() {
            i += 1;
        }
        while j < two.len() && !two[j].is_ascii_alphanumeric() {
            j += 1;
        }
        if i >= one.len() || j >= two.len() {
            break;
        }

        // Differing separator runs decide before the segments do.
        let separator_one = i - seg_end_one;
        let separator_two = j - seg_end_two;
        if separator_one != separator_two {
            return separator_one.cmp(&separator_two);
        }

        let numeric = one[i].is_ascii_digit();
        let class = |byte: &u8| {
            if numeric {
                byte.is_ascii_digit()
            } else {
                byte.is_ascii_alphabetic()
            }
        };
        let end_one = i + one[i..].iter().take_while(|byte| class(byte)).count();
        let end_two = j + two[j..].iter().take_while(|byte| class(byte)).count();

        if end_two == j {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let mut segment_one = &a[i..end_one];
        let mut segment_two = &b[j..end_two];
        if numeric {
            segment_one = segment_one.trim_start_matches('0');
            segment_two = segment_two.trim_start_matches('0');
            let by_length = segment_one.len().cmp(&segment_two.len());
            if by_length != Ordering::Equal {
                return by_length;
            }
        }
        let by_value = segment_one.cmp(segment_two);
        if by_value != Ordering::Equal {
            return by_value;
        }

        i = end_one;
        j = end_two;
        seg_end_one = i;
        seg_end_two = j;
    }

    let one_done = i >= one.len();
    let two_done = j >= two.len();
    if one_done && two_done {
        return Ordering::Equal;
    }

    let one_alpha = !one_done && one[i].is_ascii_alphabetic();
    let two_alpha = !two_done && two[j].is_ascii_alphabetic();
    if (one_done && !two_alpha) || one_alpha {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}
