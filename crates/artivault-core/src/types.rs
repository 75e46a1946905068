use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Identity of an artifact or folder inside a repository.
///
/// Equality and hashing are by `(repo_key, path)` only. The path is stored
/// normalised: no leading or trailing `/` and no empty segments, so the
/// repository root is the empty path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoPath {
    repo_key: String,
    path: String,
}

impl RepoPath {
    /// Creates a new RepoPath, normalising the relative path.
    pub fn new(repo_key: impl Into<String>, path: impl AsRef<str>) -> Self {
        let path = path
            .as_ref()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self {
            repo_key: repo_key.into(),
            path,
        }
    }

    /// The root of a repository.
    pub fn root(repo_key: impl Into<String>) -> Self {
        Self::new(repo_key, "")
    }

    /// Parses the `repo:path` form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        let (repo_key, path) = s.split_once(':')?;
        if repo_key.is_empty() {
            return None;
        }
        Some(Self::new(repo_key, path))
    }

    /// The repository key.
    pub fn repo_key(&self) -> &str {
        &self.repo_key
    }

    /// The normalised path relative to the repository root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns true for the repository root.
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The last path segment, empty for the root.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// The parent folder, or `None` for the root.
    pub fn parent(&self) -> Option<RepoPath> {
        if self.is_root() {
            return None;
        }
        let parent = match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        };
        Some(RepoPath {
            repo_key: self.repo_key.clone(),
            path: parent.to_string(),
        })
    }

    /// Returns a child path under this one.
    pub fn join(&self, child: &str) -> RepoPath {
        RepoPath::new(self.repo_key.clone(), format!("{}/{}", self.path, child))
    }

    /// Returns true if `self` lies strictly below `ancestor` in the same repository.
    pub fn is_descendant_of(&self, ancestor: &RepoPath) -> bool {
        if self.repo_key != ancestor.repo_key || self.path == ancestor.path {
            return false;
        }
        if ancestor.is_root() {
            return true;
        }
        self.path.starts_with(&ancestor.path)
            && self.path.as_bytes().get(ancestor.path.len()) == Some(&b'/')
    }

    /// Returns true if `self` equals `root` or lies below it.
    pub fn is_same_or_descendant_of(&self, root: &RepoPath) -> bool {
        self == root || self.is_descendant_of(root)
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repo_key, self.path)
    }
}

/// Supported checksum algorithms.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// MD5 (128 bit)
    Md5,
    /// SHA-1 (160 bit)
    Sha1,
    /// SHA-256 (256 bit)
    Sha256,
}

impl ChecksumType {
    /// All checksum types, weakest first.
    pub const ALL: [ChecksumType; 3] = [ChecksumType::Md5, ChecksumType::Sha1, ChecksumType::Sha256];

    /// File extension of the checksum sidecar file (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha256 => "sha256",
        }
    }

    /// Length of the hex encoded value.
    pub fn hex_len(self) -> usize {
        match self {
            ChecksumType::Md5 => 32,
            ChecksumType::Sha1 => 40,
            ChecksumType::Sha256 => 64,
        }
    }

    /// Looks up a checksum type by sidecar extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.extension().eq_ignore_ascii_case(ext))
    }

    /// Returns true if `value` looks like a hex checksum of this type.
    pub fn is_valid_value(self, value: &str) -> bool {
        value.len() == self.hex_len() && value.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumType::Md5 => write!(f, "MD5"),
            ChecksumType::Sha1 => write!(f, "SHA-1"),
            ChecksumType::Sha256 => write!(f, "SHA-256"),
        }
    }
}

/// A checksum as declared by the origin and as computed locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    /// Algorithm.
    pub checksum_type: ChecksumType,
    /// Value declared by the origin, if any.
    pub original: Option<String>,
    /// Value computed locally over the content, if any.
    pub actual: Option<String>,
}

impl ChecksumInfo {
    /// Creates a checksum info, lowercasing both values.
    pub fn new(checksum_type: ChecksumType, original: Option<&str>, actual: Option<&str>) -> Self {
        Self {
            checksum_type,
            original: original.map(str::to_ascii_lowercase),
            actual: actual.map(str::to_ascii_lowercase),
        }
    }

    /// Both values are present and equal.
    pub fn matches(&self) -> bool {
        matches!((&self.original, &self.actual), (Some(o), Some(a)) if o == a)
    }

    /// Both values are present and differ.
    pub fn conflicts(&self) -> bool {
        matches!((&self.original, &self.actual), (Some(o), Some(a)) if o != a)
    }
}

/// At most one [`ChecksumInfo`] per [`ChecksumType`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumSet {
    entries: BTreeMap<ChecksumType, ChecksumInfo>,
}

impl ChecksumSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs origin-declared values with locally computed ones.
    pub fn from_parts(
        declared: &BTreeMap<ChecksumType, String>,
        computed: &BTreeMap<ChecksumType, String>,
    ) -> Self {
        let mut set = Self::new();
        for t in ChecksumType::ALL {
            let original = declared.get(&t).map(String::as_str);
            let actual = computed.get(&t).map(String::as_str);
            if original.is_some() || actual.is_some() {
                set.insert(ChecksumInfo::new(t, original, actual));
            }
        }
        set
    }

    /// Inserts or replaces the entry for the checksum's type.
    pub fn insert(&mut self, info: ChecksumInfo) {
        self.entries.insert(info.checksum_type, info);
    }

    /// Looks up the entry for a type.
    pub fn get(&self, checksum_type: ChecksumType) -> Option<&ChecksumInfo> {
        self.entries.get(&checksum_type)
    }

    /// Iterates entries ordered by type.
    pub fn iter(&self) -> impl Iterator<Item = &ChecksumInfo> {
        self.entries.values()
    }

    /// Returns true if the set has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// At least one origin-declared value is present.
    pub fn has_declared(&self) -> bool {
        self.entries.values().any(|c| c.original.is_some())
    }

    /// At least one locally computed value is present.
    pub fn has_computed(&self) -> bool {
        self.entries.values().any(|c| c.actual.is_some())
    }

    /// Types for which declared and computed values disagree.
    pub fn conflicting_types(&self) -> Vec<ChecksumType> {
        self.entries
            .values()
            .filter(|c| c.conflicts())
            .map(|c| c.checksum_type)
            .collect()
    }

    /// At least one type matches and none conflict.
    pub fn all_comparable_match(&self) -> bool {
        let any_match = self.entries.values().any(ChecksumInfo::matches);
        any_match && self.conflicting_types().is_empty()
    }
}

/// Metadata of a folder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderInfo {
    /// Identity.
    pub repo_path: RepoPath,
    /// Creation time, ms since epoch.
    pub created: u64,
    /// Last modifier.
    pub modified_by: Option<String>,
}

impl FolderInfo {
    /// Creates folder metadata stamped with the current time.
    pub fn new(repo_path: RepoPath) -> Self {
        Self {
            repo_path,
            created: now_millis(),
            modified_by: None,
        }
    }
}

/// Metadata of a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Identity.
    pub repo_path: RepoPath,
    /// Creation time, ms since epoch.
    pub created: u64,
    /// Last modifier.
    pub modified_by: Option<String>,
    /// Content size in bytes.
    pub size: u64,
    /// MIME type.
    pub mime_type: String,
    /// Last-modified time reported by the origin, ms since epoch.
    pub last_modified: u64,
    /// When the cached copy was last refreshed from the origin; 0 means never.
    pub last_updated: u64,
    /// Binary store key of the content.
    pub digest: Option<String>,
    /// Declared and computed checksums.
    pub checksums: ChecksumSet,
}

impl FileInfo {
    /// Creates empty file metadata stamped with the current time.
    pub fn new(repo_path: RepoPath) -> Self {
        let mime_type = mime_type_for(repo_path.name()).to_string();
        Self {
            repo_path,
            created: now_millis(),
            modified_by: None,
            size: 0,
            mime_type,
            last_modified: 0,
            last_updated: 0,
            digest: None,
            checksums: ChecksumSet::new(),
        }
    }

    /// Milliseconds since the cached copy was refreshed, or -1 if never fetched.
    pub fn age(&self, now: u64) -> i64 {
        if self.last_updated == 0 {
            return -1;
        }
        now.saturating_sub(self.last_updated) as i64
    }
}

/// Metadata snapshot of a repository item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemInfo {
    /// A file.
    File(FileInfo),
    /// A folder.
    Folder(FolderInfo),
}

impl ItemInfo {
    /// Identity of the item.
    pub fn repo_path(&self) -> &RepoPath {
        match self {
            ItemInfo::File(f) => &f.repo_path,
            ItemInfo::Folder(f) => &f.repo_path,
        }
    }

    /// Returns true for files.
    pub fn is_file(&self) -> bool {
        matches!(self, ItemInfo::File(_))
    }

    /// File metadata, if this is a file.
    pub fn as_file(&self) -> Option<&FileInfo> {
        match self {
            ItemInfo::File(f) => Some(f),
            ItemInfo::Folder(_) => None,
        }
    }

    /// Mutable file metadata, if this is a file.
    pub fn as_file_mut(&mut self) -> Option<&mut FileInfo> {
        match self {
            ItemInfo::File(f) => Some(f),
            ItemInfo::Folder(_) => None,
        }
    }

    /// Cache age of a file, -1 for folders and never-fetched files.
    pub fn age(&self, now: u64) -> i64 {
        self.as_file().map_or(-1, |f| f.age(now))
    }
}

fn mime_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext {
        "jar" | "war" | "ear" => "application/java-archive",
        "pom" | "xml" => "application/xml",
        "json" => "application/json",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/x-gzip",
        "md5" | "sha1" | "sha256" | "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
