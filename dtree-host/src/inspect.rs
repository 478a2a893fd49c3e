//! The `dtree-inspect` tree walk: per-node dump, and the fence/sibling
//! invariant checker driven by the `-c` flag (spec.md §6, §8 scenario 5).
//!
//! Supplements the distilled spec with a diagnostic in the spirit of the
//! original's own `showdtree.cpp`: a recursive dump of a subtree with
//! `-r`/`-s` verbosity toggles, plus (I3)/(I4) checking as the walk
//! descends.

use dtree_btree::{check_fences, check_schema_consistency, check_siblings, Fences, SuperValue};
use dtree_error::DtResult;
use dtree_generic::{Cid, Coid, Key, Oid};
use dtree_transact::Transaction;

/// What the walk found: whether any (I3)/(I4)/schema violation was
/// reported, for `main`'s exit code.
#[derive(Default)]
pub struct WalkReport {
    pub violations: usize,
    pub nodes_visited: usize,
}

impl WalkReport {
    fn violated(&mut self, message: impl std::fmt::Display) {
        eprintln!("invariant violation: {}", message);
        self.violations += 1;
    }
}

pub struct Options {
    pub check: bool,
    pub raw: bool,
    pub summary: bool,
}

/// Inspect a single node (when `object_id` was given) or the whole tree
/// rooted at `root_cid` (when it was not).
pub async fn run(tx: &mut Transaction, root_cid: Cid, object_id: Option<Oid>, opts: &Options) -> DtResult<WalkReport> {
    let mut report = WalkReport::default();

    match object_id {
        Some(oid) => {
            let coid = Coid::new(root_cid, oid);
            let sv = read_node(tx, coid).await?;
            dump_node(coid, &sv, opts);
            if opts.check {
                check_node_schema(coid, &sv, &mut report);
            }
        }
        None => {
            let fences = Fences {
                min_exclusive: None,
                max_inclusive: None,
            };
            walk(tx, root_cid, Coid::root(root_cid), fences, opts, &mut report).await?;
        }
    }

    Ok(report)
}

async fn read_node(tx: &mut Transaction, coid: Coid) -> DtResult<SuperValue> {
    let vb = tx.vsuperget_real(coid, None).await?;
    Ok(vb.as_supervalue()?.clone())
}

fn check_node_schema(coid: Coid, sv: &SuperValue, report: &mut WalkReport) {
    if let Err(message) = check_schema_consistency(sv) {
        report.violated(format_args!("{}: {}", coid, message));
    }
}

/// Depth-first descent with inherited fence bounds (spec.md §4.5.2): each
/// child's `(fencemin, fencemax]` is derived from its position among its
/// parent's cells, not stored anywhere on the node itself.
fn walk<'a>(
    tx: &'a mut Transaction,
    root_cid: Cid,
    coid: Coid,
    fences: Fences<'a>,
    opts: &'a Options,
    report: &'a mut WalkReport,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = DtResult<()>> + 'a>> {
    Box::pin(async move {
        let sv = read_node(tx, coid).await?;
        report.nodes_visited += 1;
        dump_node(coid, &sv, opts);

        if opts.check {
            check_node_schema(coid, &sv, report);
            if let Err(violation) = check_fences(coid, &sv, Fences {
                min_exclusive: fences.min_exclusive,
                max_inclusive: fences.max_inclusive,
            }) {
                report.violated(violation);
            }
        }

        if sv.is_leaf() {
            return Ok(());
        }

        let mut previous: Option<(Coid, SuperValue)> = None;
        for index in 0..=sv.ncells() {
            let child_oid = sv.child_at(index);
            let child_coid = Coid::new(root_cid, child_oid);

            let child_min = if index == 0 {
                fences.min_exclusive
            } else {
                Some(sv.key_at(index - 1))
            };
            let child_max: Option<&Key> = if index < sv.ncells() {
                Some(sv.key_at(index))
            } else {
                fences.max_inclusive
            };

            walk(
                &mut *tx,
                root_cid,
                child_coid,
                Fences {
                    min_exclusive: child_min,
                    max_inclusive: child_max,
                },
                opts,
                &mut *report,
            )
            .await?;

            if opts.check {
                let child_sv = read_node(&mut *tx, child_coid).await?;
                if let Some((prev_coid, prev_sv)) = previous.take() {
                    if let Err(violation) = check_siblings(prev_coid, &prev_sv, child_coid, &child_sv) {
                        report.violated(violation);
                    }
                }
                previous = Some((child_coid, child_sv));
            }
        }

        Ok(())
    })
}

fn dump_node(coid: Coid, sv: &SuperValue, opts: &Options) {
    if opts.summary {
        println!(
            "{} height={} leaf={} ncells={} bytes={}",
            coid,
            sv.height(),
            sv.is_leaf(),
            sv.ncells(),
            sv.cells_size()
        );
        return;
    }

    println!("{}", coid);
    println!(
        "  flags: leaf={} intkey={} height={} ncells={} cells_size={}",
        sv.is_leaf(),
        sv.is_intkey(),
        sv.height(),
        sv.ncells(),
        sv.cells_size()
    );
    println!(
        "  lastptr={} leftptr={} rightptr={}",
        sv.lastptr(),
        sv.leftptr(),
        sv.rightptr()
    );

    for (i, cell) in sv.cells().iter().enumerate() {
        if opts.raw {
            println!("    [{}] key={:?} child={:#x}", i, cell.key, cell.value.as_u64());
        } else if sv.is_leaf() {
            println!("    [{}] key={:?}", i, cell.key);
        } else {
            println!("    [{}] key={:?} child={}", i, cell.key, cell.value);
        }
    }
}
