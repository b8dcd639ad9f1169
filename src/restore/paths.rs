//! Destination paths for relocated database files
//!
//! Paths are strings on the *server's* file system, which may not match the
//! platform this process runs on, so `std::path` is not used.

use super::metadata::LogicalFileDescriptor;

/// File system flavour of the target server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPlatform {
    Windows,
    Linux,
}

impl ServerPlatform {
    /// Detect the platform from `@@VERSION` text.
    pub fn from_version(version: &str) -> Self {
        if crate::util::contains_ci(version, "linux") {
            ServerPlatform::Linux
        } else {
            ServerPlatform::Windows
        }
    }

    pub fn separator(self) -> char {
        match self {
            ServerPlatform::Windows => '\\',
            ServerPlatform::Linux => '/',
        }
    }

    fn foreign_separator(self) -> char {
        match self {
            ServerPlatform::Windows => '/',
            ServerPlatform::Linux => '\\',
        }
    }

    /// Rewrite every separator to this platform's one.
    pub fn normalize(self, path: &str) -> String {
        path.replace(self.foreign_separator(), &self.separator().to_string())
    }

    /// Join a folder and a file name with exactly one separator between them.
    pub fn join(self, folder: &str, file_name: &str) -> String {
        let folder = self.normalize(folder);
        let sep = self.separator();
        let trimmed = folder.trim_end_matches(sep);
        if trimmed.is_empty() && folder.is_empty() {
            return self.normalize(file_name);
        }
        // A bare root such as "/" trims to nothing; keep the root itself.
        self.normalize(&format!("{}{}{}", trimmed, sep, file_name))
    }
}

/// Last path segment, splitting on either separator.
pub fn file_name_portion(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

/// Target path for one logical file of a backup.
///
/// The old database name is replaced with the new one inside the recorded
/// file name. This is a plain substring replace: a database called `Data`
/// renamed to `Sales` turns `MyData_Data.mdf` into `MySales_Sales.mdf`.
pub fn destination_path(
    descriptor: &LogicalFileDescriptor,
    old_database_name: &str,
    new_database_name: &str,
    folder: &str,
    platform: ServerPlatform,
) -> String {
    let file_name = file_name_portion(&descriptor.physical_name);
    let file_name = if old_database_name.is_empty() {
        file_name.to_string()
    } else {
        file_name.replace(old_database_name, new_database_name)
    };
    platform.join(folder, &file_name)
}
