// Platform selection for the frontend daemon executable
// Release builds ship one daemon binary per OS/CPU pair, named aether-frontend-<os>-<arch>

use std::fmt;

/// Prefix shared by every packaged daemon executable
pub const EXECUTABLE_PREFIX: &str = "aether-frontend";

/// Operating system family as it appears in executable names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsFamily {
    Win,
    Mac,
    Linux,
    /// Any platform without a rename rule, carried through verbatim
    Other(String),
}

impl OsFamily {
    /// Map a Node-style platform name (`win32`, `darwin`, `linux`, ...)
    pub fn from_node_platform(platform: &str) -> Self {
        match platform {
            "win32" => OsFamily::Win,
            "darwin" => OsFamily::Mac,
            "linux" => OsFamily::Linux,
            other => OsFamily::Other(other.to_string()),
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Win => write!(f, "win"),
            OsFamily::Mac => write!(f, "mac"),
            OsFamily::Linux => write!(f, "linux"),
            OsFamily::Other(name) => write!(f, "{}", name),
        }
    }
}

/// CPU architecture as it appears in executable names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpuArch {
    X64,
    Ia32,
    Arm64,
    Arm32,
    Other(String),
}

impl CpuArch {
    /// Map a Node-style arch name (`x64`, `ia32`, `arm64`, `arm`, ...)
    pub fn from_node_arch(arch: &str) -> Self {
        match arch {
            "x64" => CpuArch::X64,
            "ia32" => CpuArch::Ia32,
            "arm64" => CpuArch::Arm64,
            "arm" => CpuArch::Arm32,
            other => CpuArch::Other(other.to_string()),
        }
    }
}

impl fmt::Display for CpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuArch::X64 => write!(f, "x64"),
            CpuArch::Ia32 => write!(f, "ia32"),
            CpuArch::Arm64 => write!(f, "arm64"),
            CpuArch::Arm32 => write!(f, "arm32"),
            CpuArch::Other(name) => write!(f, "{}", name),
        }
    }
}

/// OS/arch pair selecting which packaged daemon executable to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableSelector {
    pub os: OsFamily,
    pub arch: CpuArch,
}

impl ExecutableSelector {
    /// Pure mapping from Node-style platform/arch names.
    ///
    /// `win32` becomes `win`, `darwin` becomes `mac`, `arm` becomes `arm32`;
    /// every other value passes through unchanged.
    pub fn from_node_names(platform: &str, arch: &str) -> Self {
        Self {
            os: OsFamily::from_node_platform(platform),
            arch: CpuArch::from_node_arch(arch),
        }
    }

    /// Selector for the platform this binary was compiled for
    pub fn current() -> Self {
        Self::from_node_names(
            node_platform_name(std::env::consts::OS),
            node_arch_name(std::env::consts::ARCH),
        )
    }

    /// `<os>-<arch>`, e.g. `win-arm32`
    pub fn os_and_arch(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    /// File name of the packaged daemon, e.g. `aether-frontend-linux-x64`
    pub fn executable_name(&self) -> String {
        format!("{}-{}", EXECUTABLE_PREFIX, self.os_and_arch())
    }
}

impl fmt::Display for ExecutableSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.os_and_arch())
    }
}

/// Rust target OS name -> Node `os.platform()` name
fn node_platform_name(os: &str) -> &str {
    match os {
        "windows" => "win32",
        "macos" => "darwin",
        other => other,
    }
}

/// Rust target arch name -> Node `os.arch()` name
fn node_arch_name(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "x86" => "ia32",
        "aarch64" => "arm64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_mapping_table() {
        let cases = [
            ("win32", OsFamily::Win, "win"),
            ("darwin", OsFamily::Mac, "mac"),
            ("linux", OsFamily::Linux, "linux"),
            ("freebsd", OsFamily::Other("freebsd".to_string()), "freebsd"),
        ];
        for (input, expected, rendered) in cases {
            let os = OsFamily::from_node_platform(input);
            assert_eq!(os, expected, "platform {}", input);
            assert_eq!(os.to_string(), rendered);
        }
    }

    #[test]
    fn test_arch_mapping_table() {
        let cases = [
            ("x64", CpuArch::X64, "x64"),
            ("ia32", CpuArch::Ia32, "ia32"),
            ("arm64", CpuArch::Arm64, "arm64"),
            ("arm", CpuArch::Arm32, "arm32"),
            ("riscv64", CpuArch::Other("riscv64".to_string()), "riscv64"),
        ];
        for (input, expected, rendered) in cases {
            let arch = CpuArch::from_node_arch(input);
            assert_eq!(arch, expected, "arch {}", input);
            assert_eq!(arch.to_string(), rendered);
        }
    }

    #[test]
    fn test_os_and_arch_combinations() {
        let cases = [
            ("win32", "arm", "win-arm32"),
            ("win32", "x64", "win-x64"),
            ("win32", "ia32", "win-ia32"),
            ("darwin", "arm64", "mac-arm64"),
            ("darwin", "x64", "mac-x64"),
            ("linux", "x64", "linux-x64"),
            ("linux", "arm", "linux-arm32"),
            ("linux", "ia32", "linux-ia32"),
        ];
        for (platform, arch, expected) in cases {
            let selector = ExecutableSelector::from_node_names(platform, arch);
            assert_eq!(selector.os_and_arch(), expected);
        }
    }

    #[test]
    fn test_executable_name() {
        let selector = ExecutableSelector::from_node_names("darwin", "arm64");
        assert_eq!(selector.executable_name(), "aether-frontend-mac-arm64");
    }

    #[test]
    fn test_current_uses_node_names() {
        let selector = ExecutableSelector::current();

        #[cfg(target_os = "linux")]
        assert_eq!(selector.os, OsFamily::Linux);
        #[cfg(target_os = "macos")]
        assert_eq!(selector.os, OsFamily::Mac);
        #[cfg(target_os = "windows")]
        assert_eq!(selector.os, OsFamily::Win);

        #[cfg(target_arch = "x86_64")]
        assert_eq!(selector.arch, CpuArch::X64);
        #[cfg(target_arch = "aarch64")]
        assert_eq!(selector.arch, CpuArch::Arm64);
    }
}
