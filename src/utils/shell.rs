// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shell quoting and remote path helpers.

/// Characters that force a word into double quotes.
///
/// Backslash, dollar, backtick, double quote, parentheses, braces, brackets
/// and space are the historic set. The remaining shell-active characters are
/// included so every quoted word survives a round trip through `bash`.
const SHELL_SPECIAL: &[char] = &[
    '\\', '$', '`', '"', '(', ')', '{', '}', '[', ']', ' ', '\t', '\n', '\'', ';', '&', '|', '<',
    '>', '*', '?', '!', '#', '~',
];

/// Characters that stay special inside double quotes.
const ESCAPED_IN_QUOTES: &[char] = &['\\', '$', '`', '"'];

/// Quote `s` for inclusion in a bash command line.
///
/// Empty input yields an empty string; words without special characters
/// pass through untouched.
pub fn escape(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    if !s.contains(SHELL_SPECIAL) {
        return s.to_string();
    }

    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        if ESCAPED_IN_QUOTES.contains(&c) {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Join a program name and escaped arguments into one command line.
pub fn join_command(program: &str, args: &[&str]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string());
    parts.extend(args.iter().map(|a| escape(a)));
    parts.join(" ")
}

/// Resolve `path` against `cwd` and normalize `.` and `..` components.
pub fn absolute_path(path: &str, cwd: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{cwd}/{path}")
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Last component of a slash-separated path.
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Everything before the last component of a normalized absolute path.
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &trimmed[..pos],
    }
}

/// Strip one trailing line terminator.
pub fn chomp(s: &str) -> &str {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .or_else(|| s.strip_suffix('\r'))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_plain_words_pass_through() {
        assert_eq!(escape(""), "");
        assert_eq!(escape("nginx"), "nginx");
        assert_eq!(escape("/var/log/app.log"), "/var/log/app.log");
        assert_eq!(escape("KEY=value"), "KEY=value");
    }

    #[test]
    fn test_escape_quotes_special_characters() {
        assert_eq!(escape("hello world"), "\"hello world\"");
        assert_eq!(escape("$HOME"), "\"\\$HOME\"");
        assert_eq!(escape("a\"b"), "\"a\\\"b\"");
        assert_eq!(escape("back\\slash"), "\"back\\\\slash\"");
        assert_eq!(escape("`id`"), "\"\\`id\\`\"");
        assert_eq!(escape("(x)"), "\"(x)\"");
        assert_eq!(escape("a;b"), "\"a;b\"");
    }

    #[test]
    fn test_escape_round_trips_through_bash() {
        let samples = [
            "plain",
            "two words",
            "$HOME and ${PATH}",
            "quote \" inside",
            "back\\slash",
            "`uname -a`",
            "[brackets] {braces} (parens)",
            "semi;colon && pipe | redirect > file",
            "it's",
            "glob * ? ~user",
        ];
        for sample in samples {
            let output = std::process::Command::new("bash")
                .arg("-c")
                .arg(format!("printf %s {}", escape(sample)))
                .output();
            let Ok(output) = output else {
                // bash not available on this machine
                return;
            };
            assert_eq!(String::from_utf8_lossy(&output.stdout), sample);
        }
    }

    #[test]
    fn test_join_command() {
        assert_eq!(join_command("ls", &[]), "ls");
        assert_eq!(join_command("ls", &["-la", "/my dir"]), "ls -la \"/my dir\"");
    }

    #[test]
    fn test_absolute_path() {
        assert_eq!(absolute_path("/etc/hosts", "/home/u"), "/etc/hosts");
        assert_eq!(absolute_path("notes.txt", "/home/u"), "/home/u/notes.txt");
        assert_eq!(absolute_path("../x/./y", "/home/u"), "/home/x/y");
        assert_eq!(absolute_path("", "/srv"), "/srv");
        assert_eq!(absolute_path("..", "/"), "/");
    }

    #[test]
    fn test_basename_and_dirname() {
        assert_eq!(basename("/etc/nginx/nginx.conf"), "nginx.conf");
        assert_eq!(basename("file"), "file");
        assert_eq!(dirname("/etc/nginx/nginx.conf"), "/etc/nginx");
        assert_eq!(dirname("/etc"), "/");
    }

    #[test]
    fn test_chomp() {
        assert_eq!(chomp("out\n"), "out");
        assert_eq!(chomp("out\r\n"), "out");
        assert_eq!(chomp("out\n\n"), "out\n");
        assert_eq!(chomp("out"), "out");
    }
}
