//! Task engine
//!
//! The [`Runner`] walks the task tree in file order: it compiles each task
//! against the current artefact frame, applies GOTO and repeat protection,
//! gates on `when` clauses, transmits the command over the device link, and
//! fans out subtasks once per tuple the `filter` regex extracted — each
//! iteration on its own copy of the artefacts so child writes never leak
//! upward. After the walk the autotests run and the task file is written
//! back with every status the run produced.

pub mod extract;
pub mod substitute;
pub mod when;

use std::collections::HashMap;
use std::mem;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::schema::{status, Task, TaskFile};
use crate::session::{DeviceLink, SendOutcome};
use crate::store::OutputStore;
use when::Action;

/// Status and output of a named task, addressable by later `when` clauses.
#[derive(Debug, Clone, Default)]
pub struct NamedOutcome {
    pub status: String,
    pub output: String,
}

/// Why the run stopped before walking everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// An `onExit` action asked for a successful shutdown.
    Exit,
    /// A fatal failure; the reason lands in the file's `error` field.
    Fatal(String),
}

/// Drives one task file against one device session.
pub struct Runner<L: DeviceLink> {
    link: L,
    file: TaskFile,
    task_path: PathBuf,
    store: OutputStore,
    names: HashMap<String, NamedOutcome>,
    /// GOTO cursor: while non-empty, siblings are skipped until the task
    /// with this name comes up.
    next_task: String,
    /// Root artefact frame. Child recursion frames are copies.
    artefacts: HashMap<String, String>,
}

impl<L: DeviceLink> Runner<L> {
    pub fn new(mut file: TaskFile, task_path: PathBuf, store: OutputStore, link: L) -> Self {
        let now = Local::now();

        let mut artefacts = HashMap::new();
        artefacts.insert("host".to_string(), file.host.clone());
        artefacts.insert("date".to_string(), now.format("%Y-%m-%d").to_string());
        artefacts.insert("time".to_string(), now.format("%H-%M-%S").to_string());
        artefacts.insert("vendor".to_string(), link.vendor().to_string());
        artefacts.insert("prompt".to_string(), link.prompt_name().to_string());

        file.vendor = link.vendor().to_string();

        // Task variables override the system artefacts on collision.
        for (key, value) in &file.variables {
            debug!("adding task variable '{}' = '{}'", key, value);
            artefacts.insert(key.clone(), value.clone());
        }

        Self {
            link,
            file,
            task_path,
            store,
            names: HashMap::new(),
            next_task: String::new(),
            artefacts,
        }
    }

    pub fn file(&self) -> &TaskFile {
        &self.file
    }

    pub fn artefacts(&self) -> &HashMap<String, String> {
        &self.artefacts
    }

    /// Walk the whole tree, then run the autotests.
    pub fn execute(&mut self) -> Result<(), Halt> {
        let mut tasks = mem::take(&mut self.file.tasks);
        let frame = self.artefacts.clone();
        let walked = self.run_level(&mut tasks, frame, 0);
        self.file.tasks = tasks;
        walked?;
        self.run_autotests()
    }

    /// Persist the task file with the run's outcome and close the session.
    pub fn finish(mut self, outcome: Result<(), Halt>) -> Result<ExitCode> {
        let exit = match outcome {
            Ok(()) | Err(Halt::Exit) => {
                info!("run finished successfully");
                self.file.status = status::SUCCESS.to_string();
                ExitCode::SUCCESS
            }
            Err(Halt::Fatal(reason)) => {
                error!("run failed: {}", reason);
                self.file.error = reason;
                self.file.status = status::FAIL.to_string();
                ExitCode::FAILURE
            }
        };

        self.file.save(&self.task_path)?;
        self.link.close();
        Ok(exit)
    }

    fn run_level(
        &mut self,
        tasks: &mut [Task],
        mut vars: HashMap<String, String>,
        depth: usize,
    ) -> Result<(), Halt> {
        debug!("executing {} tasks at depth {}", tasks.len(), depth);

        for idx in 0..tasks.len() {
            debug!("processing task {} command '{}'", idx, tasks[idx].command);

            // Compile against the current artefact frame. This happens before
            // any skip decision, so a dangling variable reference is fatal
            // even on a task that would have been skipped.
            let command = substitute::substitute(&tasks[idx].command, &vars)
                .map_err(|code| Halt::Fatal(code.to_string()))?;
            let output_file = substitute::substitute(&tasks[idx].params.output_file, &vars)
                .map_err(|code| Halt::Fatal(code.to_string()))?;
            let timeout = self.effective_timeout(tasks[idx].params.timeout);

            // A pending GOTO skips siblings until the target name shows up.
            if !self.next_task.is_empty() {
                if tasks[idx].name != self.next_task {
                    warn!("command '{}' skipped by goto", command);
                    self.set_status(&mut tasks[idx], status::SKIPPED);
                    continue;
                }
                self.next_task.clear();
            }

            // A root task that already carries a status ran in a previous
            // invocation; protect the device from a repeat unless the task
            // explicitly allows it. Subtasks replay by design.
            if !tasks[idx].status.is_empty()
                && !tasks[idx].params.command_repeat_allowed
                && depth == 0
            {
                warn!("command '{}' has already been executed", command);
                self.set_status(&mut tasks[idx], status::SKIPPED);
                continue;
            }

            // Conditional gate.
            let clauses = tasks[idx].when.as_deref().unwrap_or(&[]);
            let verdict = when::evaluate(clauses, &self.names, &vars)
                .map_err(|code| Halt::Fatal(code.to_string()))?;
            if let Some(action) = verdict.action {
                match action {
                    Action::Exit => {
                        info!("onExit action requested, shutting down");
                        return Err(Halt::Exit);
                    }
                    Action::MoveTo(name) => {
                        info!("onMove action, next task name is '{}'", name);
                        self.next_task = name;
                    }
                }
            }
            if !verdict.passed {
                info!("command '{}' conditions not met, skipping", command);
                self.set_status(&mut tasks[idx], status::SKIPPED);
                continue;
            }

            // Transmit.
            let task_name = tasks[idx].name.clone();
            let prompt_change_allowed = tasks[idx].params.prompt_change_allowed;
            let outcome = self.transmit(&task_name, &command, timeout, prompt_change_allowed);

            match outcome.error {
                Some(code) => {
                    self.set_status(&mut tasks[idx], status::FAIL);
                    if tasks[idx].params.on_error_continue {
                        warn!("command '{}' failed with '{}', continuing", command, code);
                    } else {
                        error!("command '{}' failed: {}", command, code);
                        return Err(Halt::Fatal(code.to_string()));
                    }
                }
                None => {
                    info!("command '{}' successful", command);
                    self.set_status(&mut tasks[idx], status::SUCCESS);

                    // The prompt artefact tracks the live session. The root
                    // frame observes the update immediately; child frames
                    // keep the copy they were created with.
                    let prompt = self.link.prompt_name().to_string();
                    self.artefacts.insert("prompt".to_string(), prompt.clone());
                    if depth == 0 {
                        vars.insert("prompt".to_string(), prompt);
                    }
                }
            }

            // Persist the command output when requested.
            if !output_file.is_empty() && tasks[idx].status == status::SUCCESS {
                if let Err(e) = self.store.save(&outcome.output, &output_file) {
                    error!("saving output file failed: {:#}", e);
                    return Err(Halt::Fatal(e.to_string()));
                }
                info!("saved output to '{}'", output_file);
            }

            // Fan out subtasks once per extracted tuple.
            if !tasks[idx].params.filter.is_empty() {
                let (groups, count) = extract::extract(
                    &outcome.output,
                    &tasks[idx].params.filter,
                    &tasks[idx].params.filter_exclude,
                )
                .map_err(|e| {
                    error!("filter extraction failed: {:#}", e);
                    Halt::Fatal(e.to_string())
                })?;

                if count == 0 {
                    info!("filter produced no values, skipping subtree");
                    self.set_status(&mut tasks[idx], status::SKIPPED);
                    continue;
                }

                if tasks[idx].tasks.is_none() {
                    warn!("task has a filter but no subtasks, skipping");
                    self.set_status(&mut tasks[idx], status::SKIPPED);
                    continue;
                }

                debug!("filter produced {} value tuples", count);
                for iteration in 0..count {
                    // Every iteration gets its own artefact frame so writes
                    // never leak into siblings or back into this level.
                    let mut frame = vars.clone();
                    for (group, values) in &groups {
                        debug!(
                            "artefact '{}' = '{}' for iteration {}",
                            group, values[iteration], iteration
                        );
                        frame.insert(group.clone(), values[iteration].clone());
                    }
                    if let Some(children) = tasks[idx].tasks.as_mut() {
                        self.run_level(children, frame, depth + 1)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Send a command over the link and record the output under the task's
    /// name. The output is recorded even when the send failed — the status
    /// tells the two apart.
    fn transmit(
        &mut self,
        task_name: &str,
        command: &str,
        timeout: i64,
        prompt_change_allowed: bool,
    ) -> SendOutcome {
        debug!("sending task command: '{}'", command);
        let timeout = Duration::from_secs(timeout.max(0) as u64);
        let outcome = self.link.send(command, timeout, prompt_change_allowed);

        if !task_name.is_empty() {
            debug!("enriching named task '{}' with output", task_name);
            let entry = self.names.entry(task_name.to_string()).or_default();
            entry.output = outcome.output.clone();
        }

        outcome
    }

    fn set_status(&mut self, task: &mut Task, new_status: &str) {
        task.status = new_status.to_string();
        if !task.name.is_empty() {
            debug!(
                "enriching named task '{}' with status '{}'",
                task.name, new_status
            );
            let entry = self.names.entry(task.name.clone()).or_default();
            entry.status = new_status.to_string();
        }
    }

    fn effective_timeout(&self, task_timeout: i64) -> i64 {
        if task_timeout <= 0 {
            self.file.default_timeout()
        } else {
            task_timeout
        }
    }

    /// Re-run the `autotests` clauses against the final state. Failures
    /// accumulate but only the last one is reported; any failure makes the
    /// whole run fatal after the file is saved.
    fn run_autotests(&mut self) -> Result<(), Halt> {
        let tests = match &self.file.autotests {
            Some(tests) if !tests.is_empty() => tests.clone(),
            _ => return Ok(()),
        };

        info!("starting condition autotests");
        let mut failure = None;

        for (index, test) in tests.iter().enumerate() {
            match when::evaluate(std::slice::from_ref(test), &self.names, &self.artefacts) {
                Err(code) => {
                    info!("TEST[{}] FAIL: {}", index, code);
                    failure = Some(format!("TEST[{index}] FAIL: {code}"));
                }
                Ok(verdict) => {
                    if !verdict.passed {
                        info!("TEST[{}] FAIL: condition failed", index);
                        failure = Some(format!("TEST[{index}] FAIL: condition failed"));
                        continue;
                    }
                    match verdict.action {
                        Some(Action::Exit) => {
                            info!("TEST[{}] requested shutdown", index);
                            return Err(Halt::Exit);
                        }
                        Some(Action::MoveTo(name)) => self.next_task = name,
                        None => {}
                    }
                    info!("TEST[{}] PASSED", index);
                }
            }
        }

        match failure {
            Some(reason) => Err(Halt::Fatal(reason)),
            None => Ok(()),
        }
    }
}
