//! Generator command line construction.

use std::path::PathBuf;

use crate::request::GenerationRequest;

/// How the generator executable is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable, e.g. `java`.
    pub executable: String,
    /// Flags placed right after the executable (JVM options).
    pub launch_flags: Vec<String>,
    /// Classpath override; falls back to `jar_path`.
    pub classpath: Option<String>,
    pub jar_path: PathBuf,
    pub main_class: String,
    /// Properties file handed to the generator with `-c`.
    pub properties_file: PathBuf,
}

impl LaunchSpec {
    pub fn classpath(&self) -> String {
        self.classpath
            .clone()
            .filter(|cp| !cp.trim().is_empty())
            .unwrap_or_else(|| self.jar_path.to_string_lossy().into_owned())
    }

    /// Argument vector for one run of `request`.
    pub fn command_for(&self, request: &GenerationRequest) -> Vec<String> {
        let mut cmd = Vec::with_capacity(self.launch_flags.len() + 10);
        cmd.push(self.executable.clone());
        cmd.extend(self.launch_flags.iter().cloned());
        cmd.push("-cp".to_string());
        cmd.push(self.classpath());
        cmd.push(self.main_class.clone());

        if request.suppress_name_numbering {
            cmd.push("--generate.append_numbers_to_person_names=false".to_string());
        }
        cmd.push("-p".to_string());
        cmd.push(request.patient_count.to_string());
        cmd.push("-c".to_string());
        cmd.push(self.properties_file.to_string_lossy().into_owned());
        if let Some(region) = &request.region {
            cmd.push(region.clone());
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::OutputFormat;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            executable: "java".into(),
            launch_flags: vec!["-Xmx2g".into()],
            classpath: None,
            jar_path: PathBuf::from("/app/synthea-with-dependencies.jar"),
            main_class: "App".into(),
            properties_file: PathBuf::from("/app/synthea.properties"),
        }
    }

    #[test]
    fn builds_minimal_command() {
        let req = GenerationRequest::new(10, [OutputFormat::Csv]);
        assert_eq!(
            spec().command_for(&req),
            vec![
                "java",
                "-Xmx2g",
                "-cp",
                "/app/synthea-with-dependencies.jar",
                "App",
                "-p",
                "10",
                "-c",
                "/app/synthea.properties",
            ]
        );
    }

    #[test]
    fn region_and_name_numbering() {
        let mut req = GenerationRequest::new(2, [OutputFormat::Csv]);
        req.region = Some("Massachusetts".into());
        req.suppress_name_numbering = true;
        let cmd = spec().command_for(&req);
        assert_eq!(cmd[5], "--generate.append_numbers_to_person_names=false");
        assert_eq!(cmd.last().map(String::as_str), Some("Massachusetts"));
    }

    #[test]
    fn classpath_override_wins_unless_blank() {
        let mut s = spec();
        s.classpath = Some("/opt/synthea/*".into());
        assert_eq!(s.classpath(), "/opt/synthea/*");
        s.classpath = Some("  ".into());
        assert_eq!(s.classpath(), "/app/synthea-with-dependencies.jar");
    }
}
