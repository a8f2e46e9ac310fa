#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Zip,
    Exe,
    PythonScript,
}

impl PayloadKind {
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Exe => "exe",
            Self::PythonScript => "py",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "zip" => Some(Self::Zip),
            "exe" => Some(Self::Exe),
            "py" | "python" => Some(Self::PythonScript),
            _ => None,
        }
    }

    pub fn infer_from_url(url: &str) -> Option<Self> {
        let lower = url.trim().to_ascii_lowercase();
        let without_fragment = lower.split('#').next().unwrap_or(&lower);
        let without_query = without_fragment
            .split('?')
            .next()
            .unwrap_or(without_fragment);
        let file_name = without_query.rsplit('/').next().unwrap_or("");
        let (_, extension) = file_name.rsplit_once('.')?;
        Self::parse(extension)
    }
}
