//! `Processor<A, B>`: a `Stream<A> -> Stream<B>` transformer, with the
//! arrow-style combinators the DESIGN NOTES call for (compose, product,
//! first, second, loop, choice_left, choice_right) built on top of the
//! `Stream` combinators in the parent module.

use std::cell::RefCell;
use std::rc::Rc;

use crate::process::Process;
use crate::strategy::Strategy;

use super::{concat, memo, split, unzip, Stream};

/// A `Stream<A> -> Stream<B>` transformer (spec.md §4.7). Cheap to clone;
/// `apply` may be called more than once on independent input streams.
pub struct Processor<A, B> {
    apply: Rc<dyn Fn(Stream<A>) -> Stream<B>>,
}

impl<A, B> Clone for Processor<A, B> {
    fn clone(&self) -> Self {
        Processor { apply: Rc::clone(&self.apply) }
    }
}

impl<A: 'static, B: 'static> Processor<A, B> {
    pub fn new(f: impl Fn(Stream<A>) -> Stream<B> + 'static) -> Self {
        Processor { apply: Rc::new(f) }
    }

    pub fn apply(&self, s: Stream<A>) -> Stream<B> {
        (self.apply)(s)
    }

    /// Sequential composition: `self` then `other` (the `Category`/`Arrow`
    /// `>>>` operator).
    pub fn compose<C: 'static>(self, other: Processor<B, C>) -> Processor<A, C> {
        Processor::new(move |s| other.apply(self.apply(s)))
    }
}

impl<A: Clone + 'static> Processor<A, A> {
    pub fn identity() -> Self {
        Processor::new(|s| s)
    }
}

impl<A: Clone + 'static, B: 'static> Processor<A, B> {
    /// An itemwise processor built from a plain function (the common case
    /// for `map`/`filter`-shaped stages).
    pub fn map(f: impl Fn(A) -> B + Clone + 'static) -> Self {
        Processor::new(move |s: Stream<A>| s.map(f.clone()))
    }
}

/// `first(p)`: runs `p` on the first component of a pair stream, passing
/// the second through unchanged (spec.md §4.7 arrow laws, via `unzip` +
/// `zip_seq`).
pub fn first<A: Clone + 'static, B: 'static, C: Clone + 'static>(
    p: Processor<A, B>,
) -> Processor<(A, C), (B, C)> {
    Processor::new(move |s: Stream<(A, C)>| {
        let (a_stream, c_stream) = unzip(s);
        let b_stream = p.apply(a_stream);
        b_stream.zip_seq(&c_stream)
    })
}

/// `second(p)`: the mirror of [`first`] over the other component.
pub fn second<A: Clone + 'static, B: 'static, C: Clone + 'static>(
    p: Processor<A, B>,
) -> Processor<(C, A), (C, B)> {
    Processor::new(move |s: Stream<(C, A)>| {
        let (c_stream, a_stream) = unzip(s);
        let b_stream = p.apply(a_stream);
        c_stream.zip_seq(&b_stream)
    })
}

/// `product(p, q)`: runs `p` and `q` on each side of a pair stream
/// independently, recombining the results (spec.md §4.7 arrow laws).
pub fn product<A: Clone + 'static, B: 'static, C: Clone + 'static, D: 'static>(
    p: Processor<A, B>,
    q: Processor<C, D>,
) -> Processor<(A, C), (B, D)> {
    Processor::new(move |s: Stream<(A, C)>| {
        let (a_stream, c_stream) = unzip(s);
        let b_stream = p.apply(a_stream);
        let d_stream = q.apply(c_stream);
        b_stream.zip_seq(&d_stream)
    })
}

fn cons<T: Clone + 'static>(head: T, tail: Stream<T>) -> Stream<T> {
    Stream::new(move || {
        let head = head.clone();
        let tail = tail.clone();
        Process::pure((head, tail))
    })
}

/// `ArrowLoop`-style feedback: `p` consumes `(A, D)` and produces `(B, D)`;
/// the `D` side is fed back into the next step's input, seeded with
/// `initial` for the first step. The feedback wiring uses the
/// allocate-then-patch trick from the DESIGN NOTES — a placeholder stream
/// is built first and patched with the real, memoized feedback once `p`
/// has been applied, the same shape `Integrator::new`/`set_derivative`
/// uses for self-referential derivatives (spec.md §4.7, DESIGN NOTES "A
/// loop combinator uses a memoized feedback stream").
pub fn loop_with_feedback<A: Clone + 'static, B: Clone + 'static, D: Clone + 'static>(
    initial: D,
    p: Processor<(A, D), (B, D)>,
) -> Processor<A, B> {
    Processor::new(move |input: Stream<A>| {
        let indirect: Rc<RefCell<Option<Stream<D>>>> = Rc::new(RefCell::new(None));
        let indirect_for_feedback = Rc::clone(&indirect);
        let feedback = Stream::new(move || {
            let indirect = Rc::clone(&indirect_for_feedback);
            Process::suspend(move |run, pid, k| {
                let real = indirect
                    .borrow()
                    .clone()
                    .expect("loop: feedback stream pulled before being patched");
                real.pull().run_with(run, pid, k);
            })
        });

        let paired = input.zip_seq(&feedback);
        let out = p.apply(paired);
        let (b_stream, d_stream) = unzip(out);
        let memoized_d = memo(d_stream);
        *indirect.borrow_mut() = Some(cons(initial.clone(), memoized_d));
        b_stream
    })
}

/// Tags a value as belonging to one of two branches — the payload type for
/// [`choice_left`]/[`choice_right`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

/// Lifts an itemwise function into a processor over the `Left` branch of
/// an `Either` stream, passing `Right` values through untouched. Scoped to
/// a plain function rather than an arbitrary `Processor<A, B>`: a general
/// `ArrowChoice` over lazily-pulled, possibly-stateful stream processors
/// would need to run a sub-processor per single item, which the `Stream`
/// representation here has no primitive for (spec.md §4.7 names `map`,
/// not general choice, as the combinator table's itemwise operation).
pub fn choice_left<A: 'static, B: 'static, C: 'static>(
    f: impl Fn(A) -> B + Clone + 'static,
) -> Processor<Either<A, C>, Either<B, C>> {
    Processor::new(move |s: Stream<Either<A, C>>| {
        let f = f.clone();
        s.map(move |item| match item {
            Either::Left(a) => Either::Left(f(a)),
            Either::Right(c) => Either::Right(c),
        })
    })
}

/// The mirror of [`choice_left`] over the `Right` branch.
pub fn choice_right<A: 'static, B: 'static, C: 'static>(
    f: impl Fn(A) -> B + Clone + 'static,
) -> Processor<Either<C, A>, Either<C, B>> {
    Processor::new(move |s: Stream<Either<C, A>>| {
        let f = f.clone();
        s.map(move |item| match item {
            Either::Left(c) => Either::Left(c),
            Either::Right(a) => Either::Right(f(a)),
        })
    })
}

/// Buffers `self`'s output through an unbounded queue ordered by
/// `strategy`, decoupling the pace of upstream production from downstream
/// consumption (spec.md §4.6 `InfiniteQueue` put to work as a stream
/// stage).
pub fn queue_buffered<T: 'static>(strategy: Strategy) -> Processor<T, T> {
    Processor::new(move |s: Stream<T>| concat(strategy, vec![s]))
}

/// Splits the input by `split_strategy` across `processors`, runs each
/// processor on its own substream, and recombines the outputs under
/// `concat_strategy` (FCFS for arrival order, `StaticPriorities` to
/// privilege certain branches) — spec.md §4.7's "parallel/priority
/// processor combinators".
pub fn parallel_processors<A: Clone + 'static, B: 'static>(
    split_strategy: Strategy,
    concat_strategy: Strategy,
    processors: Vec<Processor<A, B>>,
) -> Processor<A, B> {
    Processor::new(move |s: Stream<A>| {
        let n = processors.len();
        let substreams = split(split_strategy, n, s);
        let outputs: Vec<Stream<B>> = processors
            .iter()
            .cloned()
            .zip(substreams)
            .map(|(p, sub)| p.apply(sub))
            .collect();
        concat(concat_strategy, outputs)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Run;
    use crate::spec::{Method, Specs};
    use std::cell::RefCell as StdRefCell;

    fn run() -> Run {
        Run::new(Specs::new(0.0, 100.0, 1.0, Method::Euler).unwrap(), 13, 0)
    }

    fn naturals(from: i64) -> Stream<i64> {
        Stream::new(move || Process::pure((from, naturals(from + 1))))
    }

    fn take<T: Clone + 'static>(run: &Run, s: Stream<T>, n: usize) -> Vec<T> {
        let mut out = Vec::new();
        let mut cur = s;
        for _ in 0..n {
            let result: Rc<StdRefCell<Option<(T, Stream<T>)>>> = Rc::new(StdRefCell::new(None));
            let r = Rc::clone(&result);
            let body = cur.pull().map(move |pair| *r.borrow_mut() = Some(pair));
            crate::process::run_process(run, false, body);
            let (v, tail) = result.borrow_mut().take().expect("pull resolves synchronously here");
            out.push(v);
            cur = tail;
        }
        out
    }

    #[test]
    fn compose_matches_sequential_application() {
        let run = run();
        let double = Processor::map(|v: i64| v * 2);
        let inc = Processor::map(|v: i64| v + 1);
        let composed = double.clone().compose(inc.clone());
        let manual = inc.apply(double.apply(naturals(0)));
        assert_eq!(take(&run, composed.apply(naturals(0)), 4), take(&run, manual, 4));
    }

    #[test]
    fn identity_is_compose_neutral() {
        let run = run();
        let p = Processor::map(|v: i64| v + 1);
        let with_identity = Processor::<i64, i64>::identity().compose(p.clone());
        assert_eq!(take(&run, with_identity.apply(naturals(0)), 3), take(&run, p.apply(naturals(0)), 3));
    }

    #[test]
    fn first_passes_second_component_through_unchanged() {
        let run = run();
        let p = first(Processor::map(|v: i64| v * 10));
        let paired = naturals(0).zip_seq(&naturals(100));
        assert_eq!(
            take(&run, p.apply(paired), 3),
            vec![(0, 100), (10, 101), (20, 102)]
        );
    }

    #[test]
    fn product_runs_both_sides_independently() {
        let run = run();
        let p = product(Processor::map(|v: i64| v + 1), Processor::map(|v: i64| v * 2));
        let paired = naturals(0).zip_seq(&naturals(100));
        assert_eq!(
            take(&run, p.apply(paired), 3),
            vec![(1, 200), (2, 202), (3, 204)]
        );
    }

    #[test]
    fn loop_feeds_running_sum_back_into_next_step() {
        let run = run();
        // p: ((a, acc)) -> ((acc', acc')) where acc' = a + acc — a running
        // total, fed back as D and also emitted as B.
        let p: Processor<(i64, i64), (i64, i64)> =
            Processor::new(|s: Stream<(i64, i64)>| s.map(|(a, acc)| {
                let next = a + acc;
                (next, next)
            }));
        let running_sum = loop_with_feedback(0i64, p);
        assert_eq!(take(&run, running_sum.apply(naturals(1)), 4), vec![1, 3, 6, 10]);
    }

    #[test]
    fn choice_left_transforms_only_left_branch() {
        let run = run();
        let p = choice_left::<i64, i64, &'static str>(|v| v * 2);
        let s = Stream::new(|| {
            Process::pure((
                Either::Left(1i64),
                Stream::new(|| {
                    Process::pure((
                        Either::Right("x"),
                        Stream::new(|| Process::pure((Either::Left(2i64), naturals(0).map(|_| Either::Left(0))))),
                    ))
                }),
            ))
        });
        let out = take(&run, p.apply(s), 2);
        assert_eq!(out[0], Either::Left(2));
        assert_eq!(out[1], Either::Right("x"));
    }

    #[test]
    fn parallel_processors_recombine_under_fcfs() {
        let run = run();
        let doubler = Processor::map(|v: i64| v * 2);
        let incrementer = Processor::map(|v: i64| v + 1);
        let p = parallel_processors(Strategy::Fcfs, Strategy::Fcfs, vec![doubler, incrementer]);
        let mut out = take(&run, p.apply(naturals(0)), 4);
        out.sort();
        assert_eq!(out, vec![0, 1, 2, 3]);
    }
}
