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

//! Subcommand implementations for the `bfleet` binary.

pub mod exec;
pub mod list;
pub mod run;

use owo_colors::OwoColorize;

use crate::role::HostOutcome;

/// Print one line per host outcome and report whether all succeeded.
/// Outputs are printed unless `quiet`, for commands that already
/// streamed them through the host log.
pub fn report_outcomes(outcomes: &[HostOutcome], quiet: bool) -> bool {
    let mut all_ok = true;
    for outcome in outcomes {
        match &outcome.result {
            Ok(output) => {
                println!("{} {}", "✓".green(), outcome.host.name().bold());
                if !quiet && !output.is_empty() {
                    for line in output.lines() {
                        println!("    {line}");
                    }
                }
            }
            Err(e) => {
                all_ok = false;
                println!("{} {}: {:#}", "✗".red(), outcome.host.name().bold(), e);
            }
        }
    }
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        println!(
            "\n{} {} of {} hosts failed",
            "▶".red(),
            failed.to_string().yellow(),
            outcomes.len()
        );
    }
    all_ok
}
