use std::io::{self, BufRead, Write};

use sysupd_core::{AnswerCode, Question, ANSWER_NO, ANSWER_YES};
use tracing::warn;

/// Reads answers from stdin, or answers on its own when it may not ask.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Prompter {
    assume_yes: bool,
    interactive: bool,
}

impl Prompter {
    pub(crate) fn new(assume_yes: bool, interactive: bool) -> Self {
        Self {
            assume_yes,
            interactive,
        }
    }

    pub(crate) async fn confirm(&self, prompt: &str, default: bool) -> bool {
        if self.assume_yes {
            return true;
        }
        if !self.interactive {
            return default;
        }

        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let Some(line) = read_line(format!("{prompt} {hint} ")).await else {
                return default;
            };
            match parse_yes_no(&line, default) {
                Some(answer) => return answer,
                None => eprintln!("please answer y or n"),
            }
        }
    }

    pub(crate) async fn answer(&self, question: &Question) -> AnswerCode {
        let Question::SelectProvider {
            dependency,
            providers,
        } = question
        else {
            return if self.confirm(&question.prompt(), false).await {
                ANSWER_YES
            } else {
                ANSWER_NO
            };
        };

        let fallback = question.default_answer();
        if self.assume_yes || !self.interactive {
            return fallback;
        }

        let mut prompt = format!(
            "there are {} providers available for {dependency}:\n",
            providers.len()
        );
        for line in provider_lines(question) {
            prompt.push_str(&line);
            prompt.push('\n');
        }
        prompt.push_str("enter a number (default=1): ");

        loop {
            let Some(line) = read_line(prompt.clone()).await else {
                return fallback;
            };
            match parse_choice(&line, providers.len()) {
                Some(index) => return index as AnswerCode,
                None => eprintln!("invalid number: {}", line.trim()),
            }
        }
    }
}

pub(crate) fn provider_lines(question: &Question) -> Vec<String> {
    let Question::SelectProvider { providers, .. } = question else {
        return Vec::new();
    };
    providers
        .iter()
        .enumerate()
        .map(|(index, provider)| {
            format!(
                "  {}) {}/{} {}",
                index + 1,
                provider.repo,
                provider.package,
                provider.version
            )
        })
        .collect()
}

/// `None` when the input is neither empty nor a yes/no word.
pub(crate) fn parse_yes_no(line: &str, default: bool) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// One-based menu choice to a zero-based index; empty input picks the first.
pub(crate) fn parse_choice(line: &str, count: usize) -> Option<usize> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return (count > 0).then_some(0);
    }
    let choice: usize = trimmed.parse().ok()?;
    (1..=count).contains(&choice).then(|| choice - 1)
}

async fn read_line(prompt: String) -> Option<String> {
    let read = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
        let mut stderr = io::stderr();
        write!(stderr, "{prompt}")?;
        stderr.flush()?;
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        Ok((read > 0).then_some(line))
    })
    .await;

    match read {
        Ok(Ok(line)) => line,
        Ok(Err(err)) => {
            warn!(error = %err, "failed reading answer");
            None
        }
        Err(err) => {
            warn!(error = %err, "prompt task failed");
            None
        }
    }
}
