//! Easy-RSA subprocess backend.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use super::{CaError, CaStep, CertificateAuthority, Confirmation};

/// Runs `./easyrsa` inside the Easy-RSA directory.
#[derive(Debug, Clone)]
pub struct EasyRsa {
    dir: PathBuf,
    confirmation: Confirmation,
}

impl EasyRsa {
    pub fn new(dir: impl Into<PathBuf>, confirmation: Confirmation) -> Self {
        Self {
            dir: dir.into(),
            confirmation,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Execute one Easy-RSA command, answering its prompt with `answer`
    /// when running in [`Confirmation::Stdin`] mode.
    fn run(&self, step: CaStep, args: &[&str], answer: &str) -> Result<(), CaError> {
        let program = self.dir.join("easyrsa");
        let mut full_args: Vec<&str> = Vec::with_capacity(args.len() + 1);
        if self.confirmation == Confirmation::Batch {
            full_args.push("--batch");
        }
        full_args.extend_from_slice(args);

        let cmd_line = format!("{} {}", program.display(), full_args.join(" "));
        tracing::info!("easy-rsa: {step}");
        tracing::debug!("exec: {cmd_line}");

        let mut command = Command::new(&program);
        command
            .args(&full_args)
            .current_dir(&self.dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match self.confirmation {
            Confirmation::Batch => command
                .stdin(Stdio::null())
                .output()
                .map_err(|source| CaError::Spawn { step, source })?,
            Confirmation::Stdin => run_with_input(&mut command, answer)
                .map_err(|source| CaError::Spawn { step, source })?,
        };

        if !output.status.success() {
            let diagnostics = diagnostics(&output);
            tracing::error!("command failed: {cmd_line}\nstderr: {diagnostics}");
            return Err(CaError::CommandFailed { step, diagnostics });
        }
        Ok(())
    }
}

fn run_with_input(command: &mut Command, input: &str) -> std::io::Result<Output> {
    let mut child = command.stdin(Stdio::piped()).spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        // The tool may exit before reading; a broken pipe is reported via its status.
        if let Err(e) = stdin.write_all(input.as_bytes()) {
            tracing::debug!(error = %e, "CA tool closed stdin early");
        }
    }
    child.wait_with_output()
}

/// Prefer stderr, fall back to stdout; Easy-RSA prints some errors on either.
fn diagnostics(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        format!("exit {}", output.status)
    } else {
        stdout
    }
}

impl CertificateAuthority for EasyRsa {
    fn create_request(&self, name: &str) -> Result<(), CaError> {
        // An empty line accepts the default common name (the request name).
        self.run(CaStep::GenerateRequest, &["gen-req", name, "nopass"], "\n")
    }

    fn sign_request(&self, name: &str) -> Result<(), CaError> {
        self.run(CaStep::SignRequest, &["sign-req", "client", name], "yes\n")
    }

    fn revoke(&self, name: &str) -> Result<(), CaError> {
        self.run(CaStep::Revoke, &["revoke", name], "yes\n")
    }

    fn regenerate_revocation_list(&self) -> Result<(), CaError> {
        self.run(CaStep::GenerateCrl, &["gen-crl"], "")
    }
}
