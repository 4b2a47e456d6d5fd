//! The executor: walks the graph, decides per record whether a rebuild is
//! required, and runs recipes with bounded parallelism.
//!
//! Scheduling: N workers consume a shared job queue.  Traversal itself is
//! a second layer of tasks, one per node, each waiting on its
//! prerequisites' completion condvars and then enqueueing its record
//! exactly once.  With a single thread the traversal executes jobs
//! synchronously in depth-first order, which makes the run fully
//! deterministic.

use crate::db::{Db, Lookup};
use crate::graph::{Graph, InfoId, NodeId, Reason, Status};
use crate::hash;
use crate::paths;
use crate::progress::Printer;
use crate::signal;
use crate::task::{self, Termination};
use anyhow::anyhow;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct BuildOpts {
    /// Worker thread count; 1 runs serial and deterministic.
    pub threads: usize,
    /// Check prerequisite staleness by content hash instead of mtime.
    pub hash: bool,
    /// Stop a recipe at its first failing command, unless the rule is
    /// non-stop.
    pub abort_on_error: bool,
    /// Rebuild everything regardless of staleness.
    pub build_all: bool,
    /// Print commands without running them.
    pub dry_run: bool,
}

impl Default for BuildOpts {
    fn default() -> BuildOpts {
        BuildOpts {
            threads: 1,
            hash: true,
            abort_on_error: true,
            build_all: false,
            dry_run: false,
        }
    }
}

/// Run-wide result state, shared by every worker.
#[derive(Default)]
struct Outcome {
    /// A fatal failure happened; later jobs short-circuit to done.
    stopped: bool,
    /// Recipes that ran (counting each shared record once).
    tasks_ran: usize,
    error: Option<anyhow::Error>,
}

pub struct Work<'a> {
    graph: &'a Graph,
    db: Mutex<&'a mut Db>,
    printer: &'a dyn Printer,
    opts: BuildOpts,
    outcome: Mutex<Outcome>,
    /// Taken for a whole recipe when its rule is exclusive, serializing it
    /// against every other recipe.
    exclusive: Mutex<()>,
    step: AtomicUsize,
}

impl<'a> Work<'a> {
    pub fn new(
        graph: &'a Graph,
        db: &'a mut Db,
        printer: &'a dyn Printer,
        opts: BuildOpts,
    ) -> Work<'a> {
        let mut opts = opts;
        opts.threads = opts.threads.max(1);
        Work {
            graph,
            db: Mutex::new(db),
            printer,
            opts,
            outcome: Mutex::new(Outcome::default()),
            exclusive: Mutex::new(()),
            step: AtomicUsize::new(0),
        }
    }

    /// Run every stale recipe reachable from the graph root.  Returns the
    /// number of recipes that ran, or the first fatal error.
    pub fn run(self) -> anyhow::Result<usize> {
        signal::install();

        // Count the recipes this run should execute, once per shared
        // record.  This also fills every staleness memo while we are still
        // single threaded.
        let mut steps = 0;
        for iid in self.graph.all_infos() {
            if self.needs_rebuild(iid) && self.has_recipe(iid) {
                steps += 1;
            }
        }
        self.printer.set_steps(steps);

        if self.opts.threads == 1 {
            self.visit_serial(self.graph.root);
        } else {
            let (tx, rx) = mpsc::channel::<InfoId>();
            let rx = Mutex::new(rx);
            thread::scope(|s| {
                for _ in 0..self.opts.threads {
                    s.spawn(|| loop {
                        let job = rx.lock().unwrap().recv();
                        match job {
                            Ok(iid) => self.exec_job(iid),
                            Err(_) => break,
                        }
                    });
                }
                self.visit_parallel(s, &tx, self.graph.root);
                self.wait_done(self.graph.node(self.graph.root).info);
                // Close the queue so idle workers exit; in-flight traversal
                // tasks hold their own clones.
                drop(tx);
            });
        }

        self.printer.clear();
        if let Err(err) = self.db.lock().unwrap().save() {
            eprintln!("mek: warning: saving database: {}", err);
        }
        let mut outcome = self.outcome.lock().unwrap();
        match outcome.error.take() {
            Some(err) => Err(err),
            None => Ok(outcome.tasks_ran),
        }
    }

    fn has_recipe(&self, iid: InfoId) -> bool {
        !self.graph.info(iid).state.lock().unwrap().recipe.is_empty()
    }

    /// Whether this record must run: forced by options or attributes, or
    /// stale per the database.
    fn needs_rebuild(&self, iid: InfoId) -> bool {
        self.opts.build_all
            || self.graph.info(iid).rule.attrs.linked
            || self.out_of_date(iid).stale()
    }

    /// Staleness, memoized: computed at most once per record per run, so
    /// shared prerequisites revisited from many dependents are cheap and
    /// every caller observes the same answer.
    pub fn out_of_date(&self, iid: InfoId) -> Reason {
        let info = self.graph.info(iid);
        if let Some(reason) = info.state.lock().unwrap().stale {
            return reason;
        }
        let reason = self.compute_out_of_date(iid);
        info.state.lock().unwrap().stale = Some(reason);
        reason
    }

    fn compute_out_of_date(&self, iid: InfoId) -> Reason {
        let info = self.graph.info(iid);
        let rule = &info.rule;

        if rule.attrs.rebuild {
            return Reason::Rebuild;
        }

        let outputs = info.state.lock().unwrap().outputs.clone();
        if !rule.attrs.virtual_ && outputs.iter().any(|f| !f.exists) {
            return Reason::NoExist;
        }

        // An externally-touched prerequisite forces a rebuild regardless
        // of hashes or timestamps.
        for &p in &info.prereqs {
            let pstate = self.graph.node_info(p).state.lock().unwrap();
            if pstate.outputs.iter().any(|f| f.updated) {
                return Reason::ForceUpdate;
            }
        }

        if self.opts.hash {
            for (pname, &pid) in rule.prereqs.iter().zip(&info.prereqs) {
                if self.graph.node_info(pid).rule.attrs.virtual_ {
                    continue;
                }
                let path = paths::join(&info.dir, pname);
                match hash::of_file(&path) {
                    Err(_) => return Reason::HashModified,
                    Ok(fp) => {
                        let db = self.db.lock().unwrap();
                        match db.prereq_state(&rule.targets, &info.dir, pname, fp) {
                            Lookup::Untracked => return Reason::Untracked,
                            Lookup::Mismatch => return Reason::HashModified,
                            Lookup::Match => {}
                        }
                    }
                }
            }
        } else if let Some(oldest) = outputs.iter().filter_map(|f| f.mtime).min() {
            for &pid in &info.prereqs {
                let pstate = self.graph.node_info(pid).state.lock().unwrap();
                let prereq_oldest = pstate.outputs.iter().filter_map(|f| f.mtime).min();
                if let Some(t) = prereq_oldest {
                    if t > oldest {
                        return Reason::TimeModified;
                    }
                }
            }
        }

        let recipe = info.state.lock().unwrap().recipe.clone();
        if !recipe.is_empty() {
            let db = self.db.lock().unwrap();
            match db.recipe_state(&rule.targets, &recipe.join("\n"), &info.dir) {
                Lookup::Untracked => return Reason::Untracked,
                Lookup::Mismatch => return Reason::RecipeModified,
                Lookup::Match => {}
            }
        }

        for &pid in &info.prereqs {
            let piid = self.graph.node(pid).info;
            if self.graph.info(piid).rule.attrs.linked || self.out_of_date(piid).stale() {
                return Reason::Prereq;
            }
        }

        Reason::UpToDate
    }

    fn wait_done(&self, iid: InfoId) {
        let info = self.graph.info(iid);
        let mut state = info.state.lock().unwrap();
        while state.status != Status::Done {
            state = info.cond.wait(state).unwrap();
        }
    }

    fn finish(&self, iid: InfoId, failed: bool) {
        let info = self.graph.info(iid);
        let mut state = info.state.lock().unwrap();
        state.failed = failed;
        state.status = Status::Done;
        info.cond.notify_all();
    }

    /// Claim traversal of a record.  Returns false when the record is
    /// already done, already claimed by another node sharing it, or up to
    /// date (in which case it is marked done here).
    fn claim(&self, iid: InfoId) -> bool {
        let need = self.needs_rebuild(iid);
        let info = self.graph.info(iid);
        let mut state = info.state.lock().unwrap();
        if state.status == Status::Done {
            return false;
        }
        if !need {
            state.status = Status::Done;
            info.cond.notify_all();
            return false;
        }
        if state.visited {
            return false;
        }
        state.visited = true;
        true
    }

    /// Enqueue exactly once, guarded by the record's lock.
    fn enqueue(&self, iid: InfoId) -> bool {
        let info = self.graph.info(iid);
        let mut state = info.state.lock().unwrap();
        if state.status != Status::Unresolved {
            return false;
        }
        state.status = Status::Queued;
        true
    }

    fn visit_serial(&self, id: NodeId) {
        let iid = self.graph.node(id).info;
        if !self.claim(iid) {
            return;
        }
        for &p in &self.graph.info(iid).prereqs {
            self.visit_serial(p);
        }
        if self.enqueue(iid) {
            self.exec_job(iid);
        }
    }

    fn visit_parallel<'env, 'scope>(
        &'env self,
        s: &'scope thread::Scope<'scope, 'env>,
        tx: &mpsc::Sender<InfoId>,
        id: NodeId,
    ) {
        let iid = self.graph.node(id).info;
        if !self.claim(iid) {
            return;
        }
        let info = self.graph.info(iid);
        for &p in &info.prereqs {
            let tx = tx.clone();
            s.spawn(move || self.visit_parallel(s, &tx, p));
        }
        for &p in &info.prereqs {
            self.wait_done(self.graph.node(p).info);
        }
        if self.enqueue(iid) {
            // The send only fails if the workers are gone, i.e. shutdown.
            let _ = tx.send(iid);
        }
    }

    /// Run one record's recipe (or short-circuit it).
    fn exec_job(&self, iid: InfoId) {
        let info = self.graph.info(iid);
        let recipe = info.state.lock().unwrap().recipe.clone();
        let stopped = self.outcome.lock().unwrap().stopped;
        if recipe.is_empty() || stopped {
            self.finish(iid, false);
            return;
        }

        let _guard = info
            .rule
            .attrs
            .exclusive
            .then(|| self.exclusive.lock().unwrap());

        let name = info.name();
        let dir = if info.dir.is_empty() {
            "."
        } else {
            info.dir.as_str()
        };
        let step = self.step.fetch_add(1, Ordering::SeqCst) + 1;
        let mut failed = false;
        let mut error: Option<anyhow::Error> = None;
        for cmd in &recipe {
            if !info.rule.attrs.quiet {
                self.printer.print(cmd, &info.dir, name, step);
            }
            if self.opts.dry_run {
                continue;
            }
            match task::run_command(Path::new(dir), cmd) {
                Ok(result) => {
                    if !result.output.is_empty() {
                        std::io::stdout().write_all(&result.output).unwrap();
                    }
                    match result.termination {
                        Termination::Success => {}
                        t => {
                            failed = true;
                            if error.is_none() {
                                let what = if t == Termination::Interrupted {
                                    "interrupted"
                                } else {
                                    "failed"
                                };
                                error = Some(anyhow!("recipe for {:?} {}: {}", name, what, cmd));
                            }
                            if self.opts.abort_on_error && !info.rule.attrs.non_stop {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    failed = true;
                    if error.is_none() {
                        error = Some(err.context(format!("recipe for {:?}", name)));
                    }
                    if self.opts.abort_on_error && !info.rule.attrs.non_stop {
                        break;
                    }
                }
            }
            self.printer.update();
        }

        if failed {
            let mut error = error.unwrap_or_else(|| anyhow!("recipe for {:?} failed", name));
            if !info.rule.attrs.virtual_ {
                // Outputs of a failed recipe are suspect: delete them so
                // the next run starts from a clean slate.
                let outputs = info.state.lock().unwrap().outputs.clone();
                for f in &outputs {
                    if let Err(err) = std::fs::remove_file(&f.name) {
                        if err.kind() != std::io::ErrorKind::NotFound {
                            error = error.context(format!("removing output {:?}: {}", f.name, err));
                        }
                    }
                }
            }
            let mut outcome = self.outcome.lock().unwrap();
            outcome.stopped = true;
            if outcome.error.is_none() {
                outcome.error = Some(error);
            }
        } else {
            if !self.opts.dry_run {
                self.record_success(iid, &recipe);
            }
            self.outcome.lock().unwrap().tasks_ran += 1;
        }

        self.printer.done(name);
        self.finish(iid, failed);
    }

    /// Record fingerprints for a recipe that completed, and refresh the
    /// stat cache of its outputs for downstream timestamp comparisons.
    fn record_success(&self, iid: InfoId, recipe: &[String]) {
        let info = self.graph.info(iid);
        let rule = &info.rule;
        {
            let mut db = self.db.lock().unwrap();
            db.insert_recipe(&rule.targets, &recipe.join("\n"), &info.dir);
            for (pname, &pid) in rule.prereqs.iter().zip(&info.prereqs) {
                if self.graph.node_info(pid).rule.attrs.virtual_ {
                    continue;
                }
                let path = paths::join(&info.dir, pname);
                if let Ok(fp) = hash::of_file(&path) {
                    db.insert_prereq(&rule.targets, &info.dir, pname, fp);
                }
            }
        }
        let mut state = info.state.lock().unwrap();
        for f in state.outputs.iter_mut() {
            f.refresh();
        }
    }
}
