//! Iteration strategies over the router and validator
//!
//! Best-of-N, the refinement loop and iteration chain, genetic evolution,
//! A/B and prompt duels, and the fallback test. Scoring is deterministic;
//! all nondeterminism comes from the LLM. Parallel LLM calls are bounded by
//! a semaphore. A failed candidate scores zero and the strategy proceeds.

use crate::validate::Validator;
use forge_core::{ForgeResult, ProviderError, Score};
use forge_llm::{GenerateMeta, GenerateRequest, Router};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Default bound on concurrent LLM calls.
pub const DEFAULT_PARALLELISM: usize = 3;

/// One scored generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub html: String,
    pub score: Score,
    pub meta: GenerateMeta,
}

/// Per-iteration record emitted by the iteration chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub total: f64,
    pub improved: bool,
}

/// Options for the standalone refinement loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineOptions {
    /// Stop refining once the total reaches this.
    pub threshold: f64,
    pub max_rounds: u32,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            max_rounds: 3,
        }
    }
}

/// Options for the iteration chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainOptions {
    /// Stop refining once the total reaches this.
    pub threshold: f64,
    pub max_rounds: u32,
    /// Stop after this many consecutive non-improving rounds.
    pub patience: u32,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            max_rounds: 3,
            patience: 2,
        }
    }
}

/// One variant's report in a duel outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantReport {
    /// Provider alias (A/B test) or prompt label (prompt duel).
    pub variant: String,
    pub total: f64,
    pub conatus: f64,
    pub ratio: f64,
    pub laetitia: f64,
    pub natura: f64,
    /// Top three issues; empty for the winner.
    pub top_issues: Vec<String>,
}

/// Duel result: the winner's document plus per-variant reasoning, sorted
/// total-descending.
#[derive(Debug, Clone, PartialEq)]
pub struct DuelOutcome {
    pub winner: String,
    pub winner_html: String,
    pub winner_score: Score,
    pub variants: Vec<VariantReport>,
}

/// Options for genetic evolution.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolveOptions {
    pub population: usize,
    pub generations: u32,
    pub elite: usize,
    pub mutation_rate: f64,
    pub threshold: f64,
    /// Fixed seed for reproducible breeding in tests.
    pub seed: Option<u64>,
}

impl Default for EvolveOptions {
    fn default() -> Self {
        Self {
            population: 6,
            generations: 3,
            elite: 2,
            mutation_rate: 0.3,
            threshold: 0.85,
            seed: None,
        }
    }
}

/// One member of an evolving population. Lives only within a single
/// evolve call.
#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    pub prompt: String,
    pub html: Option<String>,
    pub fitness: Option<Score>,
    pub generation: u32,
}

/// Evolution result.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolveOutcome {
    pub best: Candidate,
    pub best_prompt: String,
    pub generations_run: u32,
}

/// Strategy executor bound to a router and validator.
pub struct Strategies {
    router: Arc<Router>,
    validator: Arc<Validator>,
    semaphore: Arc<Semaphore>,
}

impl Strategies {
    pub fn new(router: Arc<Router>, validator: Arc<Validator>, parallelism: usize) -> Self {
        Self {
            router,
            validator,
            semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
        }
    }

    /// Generate once and validate.
    pub async fn generate_scored(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> ForgeResult<Candidate> {
        let (html, meta) = self.router.generate(request, None, cancel).await?;
        let score = self.validator.validate(&html);
        Ok(Candidate { html, score, meta })
    }

    /// Bounded-parallel generation under the shared semaphore.
    async fn generate_scored_bounded(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> ForgeResult<Candidate> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ProviderError::Cancelled)?;
        self.generate_scored(&request, &cancel).await
    }

    // ------------------------------------------------------------------
    // best-of-N
    // ------------------------------------------------------------------

    /// Run `n` generations and return the highest-scoring candidate. Ties
    /// keep the earliest generation. Failed candidates are skipped; if all
    /// fail, the first error comes back verbatim.
    pub async fn best_of_n(
        &self,
        request: &GenerateRequest,
        n: u32,
        cancel: &CancellationToken,
    ) -> ForgeResult<Candidate> {
        let n = n.max(1);
        let runs = (0..n).map(|_| self.generate_scored_bounded(request.clone(), cancel.clone()));
        let results = futures_util::future::join_all(runs).await;

        let mut best: Option<Candidate> = None;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(candidate) => {
                    let better = best
                        .as_ref()
                        .map(|b| candidate.score.total > b.score.total)
                        .unwrap_or(true);
                    if better {
                        best = Some(candidate);
                    }
                }
                Err(error) => {
                    tracing::debug!(%error, "Best-of-N candidate failed");
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }
        match best {
            Some(candidate) => Ok(candidate),
            None => Err(first_error.unwrap_or_else(|| {
                ProviderError::EmptyResponse {
                    provider: "best-of-n".to_string(),
                }
                .into()
            })),
        }
    }

    // ------------------------------------------------------------------
    // refinement
    // ------------------------------------------------------------------

    /// One refinement round. Returns the replacement only when it strictly
    /// improves on `current`; otherwise returns `current` unchanged.
    pub async fn refine_once(
        &self,
        request: &GenerateRequest,
        current: Candidate,
        cancel: &CancellationToken,
    ) -> ForgeResult<(Candidate, bool)> {
        let mut refine_request = request.clone();
        refine_request.prompt =
            build_refinement_prompt(&request.prompt, &current.html, &current.score);

        match self.generate_scored(&refine_request, cancel).await {
            Ok(candidate) if candidate.score.total > current.score.total => {
                Ok((candidate, true))
            }
            Ok(_) => Ok((current, false)),
            Err(error) if error.is_cancelled() => Err(error),
            Err(error) => {
                // A failed refinement round scores zero and never replaces
                // the current document.
                tracing::debug!(%error, "Refinement round failed");
                Ok((current, false))
            }
        }
    }

    /// The refinement loop over an externally supplied candidate: keep
    /// regenerating while below threshold, accepting only strict
    /// improvements. Stops at the threshold, after `max_rounds`, or on the
    /// first non-improving round. Never returns a candidate scoring below
    /// the input.
    pub async fn refine(
        &self,
        request: &GenerateRequest,
        current: Candidate,
        options: &RefineOptions,
        cancel: &CancellationToken,
    ) -> ForgeResult<Candidate> {
        let mut current = current;
        let mut round = 0u32;
        while current.score.total < options.threshold && round < options.max_rounds {
            round += 1;
            let (next, improved) = self.refine_once(request, current, cancel).await?;
            current = next;
            if !improved {
                break;
            }
        }
        Ok(current)
    }

    /// Generate once, then refine while below threshold. Unlike the plain
    /// refinement loop, the chain tolerates `patience` consecutive
    /// non-improving rounds before giving up, and emits one record per
    /// iteration. The final candidate never scores below the initial one.
    pub async fn iteration_chain(
        &self,
        request: &GenerateRequest,
        options: &ChainOptions,
        cancel: &CancellationToken,
    ) -> ForgeResult<(Candidate, Vec<IterationRecord>)> {
        let mut current = self.generate_scored(request, cancel).await?;
        let mut records = vec![IterationRecord {
            iteration: 0,
            total: current.score.total,
            improved: true,
        }];

        let mut stale_rounds = 0u32;
        let mut round = 0u32;
        while current.score.total < options.threshold
            && round < options.max_rounds
            && stale_rounds < options.patience
        {
            round += 1;
            let (next, improved) = self.refine_once(request, current, cancel).await?;
            current = next;
            if improved {
                stale_rounds = 0;
            } else {
                stale_rounds += 1;
            }
            records.push(IterationRecord {
                iteration: round,
                total: current.score.total,
                improved,
            });
        }
        Ok((current, records))
    }

    // ------------------------------------------------------------------
    // duels
    // ------------------------------------------------------------------

    /// Generate the same prompt across providers concurrently and pick the
    /// winner. Failed providers are omitted; when every provider fails the
    /// duel reports `AllProvidersFailed`.
    pub async fn ab_test(
        &self,
        request: &GenerateRequest,
        providers: &[String],
        cancel: &CancellationToken,
    ) -> ForgeResult<DuelOutcome> {
        let variants: Vec<(String, GenerateRequest)> = providers
            .iter()
            .map(|alias| {
                let mut variant_request = request.clone();
                variant_request.model_alias = alias.clone();
                (alias.clone(), variant_request)
            })
            .collect();
        self.duel(variants, cancel).await
    }

    /// Same structure over prompt variants against a single provider.
    pub async fn prompt_duel(
        &self,
        base: &GenerateRequest,
        prompts: &[String],
        cancel: &CancellationToken,
    ) -> ForgeResult<DuelOutcome> {
        let variants: Vec<(String, GenerateRequest)> = prompts
            .iter()
            .enumerate()
            .map(|(i, prompt)| {
                let mut variant_request = base.clone();
                variant_request.prompt = prompt.clone();
                (format!("prompt-{}", i + 1), variant_request)
            })
            .collect();
        self.duel(variants, cancel).await
    }

    async fn duel(
        &self,
        variants: Vec<(String, GenerateRequest)>,
        cancel: &CancellationToken,
    ) -> ForgeResult<DuelOutcome> {
        let attempted: Vec<String> = variants.iter().map(|(label, _)| label.clone()).collect();
        let runs = variants.into_iter().map(|(label, request)| {
            let cancel = cancel.clone();
            async move {
                let result = self.generate_scored_bounded(request, cancel).await;
                (label, result)
            }
        });
        let results = futures_util::future::join_all(runs).await;

        let mut scored: Vec<(String, Candidate)> = Vec::new();
        for (label, result) in results {
            match result {
                Ok(candidate) => scored.push((label, candidate)),
                Err(error) => {
                    tracing::debug!(variant = %label, %error, "Duel variant failed");
                }
            }
        }
        if scored.is_empty() {
            return Err(ProviderError::AllProvidersFailed { attempted }.into());
        }

        scored.sort_by(|a, b| {
            b.1.score
                .total
                .partial_cmp(&a.1.score.total)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let variants: Vec<VariantReport> = scored
            .iter()
            .enumerate()
            .map(|(rank, (label, candidate))| VariantReport {
                variant: label.clone(),
                total: candidate.score.total,
                conatus: candidate.score.conatus,
                ratio: candidate.score.ratio,
                laetitia: candidate.score.laetitia,
                natura: candidate.score.natura,
                top_issues: if rank == 0 {
                    Vec::new()
                } else {
                    candidate.score.issues.iter().take(3).cloned().collect()
                },
            })
            .collect();

        let (winner, winner_candidate) = scored.swap_remove(0);
        Ok(DuelOutcome {
            winner,
            winner_html: winner_candidate.html,
            winner_score: winner_candidate.score,
            variants,
        })
    }

    /// Run the primary; if it fails or scores below threshold, run the
    /// fallback; return the higher-scoring of the two.
    pub async fn fallback_test(
        &self,
        request: &GenerateRequest,
        primary: &str,
        fallback: &str,
        threshold: f64,
        cancel: &CancellationToken,
    ) -> ForgeResult<Candidate> {
        let mut primary_request = request.clone();
        primary_request.model_alias = primary.to_string();
        let primary_result = self.generate_scored(&primary_request, cancel).await;

        let primary_candidate = match primary_result {
            Ok(candidate) if candidate.score.total >= threshold => return Ok(candidate),
            Ok(candidate) => Some(candidate),
            Err(error) => {
                tracing::debug!(%error, "Primary failed, trying fallback");
                None
            }
        };

        let mut fallback_request = request.clone();
        fallback_request.model_alias = fallback.to_string();
        match (self.generate_scored(&fallback_request, cancel).await, primary_candidate) {
            (Ok(fb), Some(primary)) => {
                if fb.score.total > primary.score.total {
                    Ok(fb)
                } else {
                    Ok(primary)
                }
            }
            (Ok(fb), None) => Ok(fb),
            (Err(_), Some(primary)) => Ok(primary),
            (Err(error), None) => Err(error),
        }
    }

    // ------------------------------------------------------------------
    // genetic evolution
    // ------------------------------------------------------------------

    /// Evolve prompt variants toward the threshold.
    pub async fn evolve(
        &self,
        request: &GenerateRequest,
        options: &EvolveOptions,
        cancel: &CancellationToken,
    ) -> ForgeResult<EvolveOutcome> {
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let population_size = options.population.max(2);
        let elite = options.elite.clamp(1, population_size - 1);

        // Seed: the base prompt unchanged plus mutated variants.
        let mut population: Vec<Individual> = vec![Individual {
            prompt: request.prompt.clone(),
            html: None,
            fitness: None,
            generation: 0,
        }];
        while population.len() < population_size {
            population.push(Individual {
                prompt: genes::mutate_prompt(&request.prompt, 1.0, &mut rng),
                html: None,
                fitness: None,
                generation: 0,
            });
        }

        let mut generations_run = 0;
        for generation in 0..options.generations.max(1) {
            generations_run = generation + 1;
            self.evaluate_population(&mut population, request, cancel).await;

            population.sort_by(|a, b| {
                fitness_total(b)
                    .partial_cmp(&fitness_total(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            if fitness_total(&population[0]) >= options.threshold {
                break;
            }
            if generation + 1 == options.generations.max(1) {
                break;
            }

            // Breed: elites survive unchanged, the rest come from
            // tournament-selected parents.
            let mut next: Vec<Individual> = population.iter().take(elite).cloned().collect();
            while next.len() < population_size {
                let mother = genes::tournament(&population, 3, &mut rng);
                let father = genes::tournament(&population, 3, &mut rng);
                let child_prompt = genes::crossover(&mother.prompt, &father.prompt, &mut rng);
                let child_prompt =
                    genes::mutate_prompt(&child_prompt, options.mutation_rate, &mut rng);
                next.push(Individual {
                    prompt: child_prompt,
                    html: None,
                    fitness: None,
                    generation: generation + 1,
                });
            }
            population = next;
        }

        let best = population
            .into_iter()
            .max_by(|a, b| {
                fitness_total(a)
                    .partial_cmp(&fitness_total(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("population is never empty");

        match (best.html, best.fitness) {
            (Some(html), Some(score)) => Ok(EvolveOutcome {
                best: Candidate {
                    html,
                    score,
                    meta: GenerateMeta {
                        provider: forge_llm::detect_provider(&request.model_alias).to_string(),
                        resolved_model: forge_llm::resolve_model(&request.model_alias),
                        duration_ms: 0,
                        tokens_in_est: 0,
                        tokens_out_est: 0,
                    },
                },
                best_prompt: best.prompt,
                generations_run,
            }),
            _ => Err(ProviderError::AllProvidersFailed {
                attempted: vec![request.model_alias.clone()],
            }
            .into()),
        }
    }

    /// Evaluate unevaluated individuals in bounded parallel. A failed
    /// generation leaves fitness at zero.
    async fn evaluate_population(
        &self,
        population: &mut [Individual],
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) {
        let pending: Vec<(usize, GenerateRequest)> = population
            .iter()
            .enumerate()
            .filter(|(_, individual)| individual.fitness.is_none())
            .map(|(i, individual)| {
                let mut individual_request = request.clone();
                individual_request.prompt = individual.prompt.clone();
                (i, individual_request)
            })
            .collect();

        let evaluations = pending.into_iter().map(|(i, individual_request)| {
            let cancel = cancel.clone();
            async move {
                (i, self.generate_scored_bounded(individual_request, cancel).await)
            }
        });

        for (i, result) in futures_util::future::join_all(evaluations).await {
            match result {
                Ok(candidate) => {
                    population[i].html = Some(candidate.html);
                    population[i].fitness = Some(candidate.score);
                }
                Err(error) => {
                    tracing::debug!(%error, "Individual evaluation failed");
                    population[i].fitness = Some(Score::zero("generation failed"));
                }
            }
        }
    }
}

impl std::fmt::Debug for Strategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategies").finish()
    }
}

fn fitness_total(individual: &Individual) -> f64 {
    individual.fitness.as_ref().map(|s| s.total).unwrap_or(0.0)
}

/// Build the refinement prompt: restate the goal, list missed indicators,
/// and name the two weakest axes as focus areas.
pub fn build_refinement_prompt(original_prompt: &str, html: &str, score: &Score) -> String {
    let [weakest, second] = score.weakest_axes();
    let mut prompt = String::with_capacity(original_prompt.len() + html.len() + 512);
    prompt.push_str("Improve the HTML application below. Original request:\n");
    prompt.push_str(original_prompt);
    prompt.push_str("\n\nKnown issues to fix:\n");
    if score.issues.is_empty() {
        prompt.push_str("- raise overall quality\n");
    }
    for issue in score.issues.iter().take(8) {
        prompt.push_str("- ");
        prompt.push_str(issue);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nFocus areas: {} and {}.\n",
        weakest, second
    ));
    prompt.push_str("Return the complete improved HTML document, nothing else.\n\nCurrent document:\n");
    prompt.push_str(html);
    prompt
}

// ============================================================================
// GENE OPERATORS
// ============================================================================

/// Pure prompt-genetics helpers: tokenization, crossover, mutation,
/// tournament selection.
pub mod genes {
    use super::Individual;
    use rand::Rng;

    /// Genes shorter than this are dropped by tokenization.
    const MIN_GENE_LEN: usize = 5;

    /// Fixed textual mutations appended to a gene.
    pub const MUTATIONS: &[&str] = &[
        "with smooth micro-animations",
        "with full keyboard accessibility",
        "with a bold color accent",
        "with a compact summary view",
        "with delightful empty states",
        "with generous touch targets",
    ];

    /// Split a prompt into sentence genes on `.`, `!`, `?`, and newlines.
    /// Genes under five characters are dropped.
    pub fn tokenize(prompt: &str) -> Vec<String> {
        prompt
            .split(|c| c == '.' || c == '!' || c == '?' || c == '\n')
            .map(str::trim)
            .filter(|gene| gene.len() >= MIN_GENE_LEN)
            .map(str::to_string)
            .collect()
    }

    /// Single-point crossover over sentence genes. Falls back to the
    /// mother when either side has no genes.
    pub fn crossover(mother: &str, father: &str, rng: &mut impl Rng) -> String {
        let mother_genes = tokenize(mother);
        let father_genes = tokenize(father);
        if mother_genes.is_empty() || father_genes.is_empty() {
            return mother.to_string();
        }
        let cut_mother = rng.gen_range(0..=mother_genes.len());
        let cut_father = rng.gen_range(0..=father_genes.len());
        let mut child: Vec<String> = mother_genes[..cut_mother].to_vec();
        child.extend(father_genes[cut_father..].iter().cloned());
        if child.is_empty() {
            return mother.to_string();
        }
        child.join(". ")
    }

    /// Mutate each gene with probability `rate` by appending a fixed
    /// textual mutation.
    pub fn mutate_prompt(prompt: &str, rate: f64, rng: &mut impl Rng) -> String {
        let genes = tokenize(prompt);
        if genes.is_empty() {
            return prompt.to_string();
        }
        let mutated: Vec<String> = genes
            .into_iter()
            .map(|gene| {
                if rng.gen_bool(rate.clamp(0.0, 1.0)) {
                    let mutation = MUTATIONS[rng.gen_range(0..MUTATIONS.len())];
                    format!("{} {}", gene, mutation)
                } else {
                    gene
                }
            })
            .collect();
        mutated.join(". ")
    }

    /// Tournament selection: sample `k` individuals, return the fittest.
    pub fn tournament<'a>(
        population: &'a [Individual],
        k: usize,
        rng: &mut impl Rng,
    ) -> &'a Individual {
        let mut best = &population[rng.gen_range(0..population.len())];
        for _ in 1..k.max(1) {
            let contender = &population[rng.gen_range(0..population.len())];
            if super::fitness_total(contender) > super::fitness_total(best) {
                best = contender;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::fixtures::RICH_HTML;
    use forge_llm::{MockHtmlProvider, ProviderKind};

    const POOR_HTML: &str = "<html></html>";

    fn strategies(mock: MockHtmlProvider) -> Strategies {
        let router = Arc::new(Router::empty().with_provider(Arc::new(mock)));
        Strategies::new(router, Arc::new(Validator::new()), DEFAULT_PARALLELISM)
    }

    fn request(alias: &str) -> GenerateRequest {
        GenerateRequest::new("build a habit tracker with streaks", alias)
    }

    /// A pre-scored candidate as a refinement loop input.
    fn strategies_candidate(html: &str) -> Candidate {
        Candidate {
            html: html.to_string(),
            score: Validator::new().validate(html),
            meta: GenerateMeta {
                provider: "gemini".to_string(),
                resolved_model: "gemini-2.0-flash".to_string(),
                duration_ms: 0,
                tokens_in_est: 0,
                tokens_out_est: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_best_of_n_returns_max() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini)
            .push_response(POOR_HTML)
            .push_response(RICH_HTML)
            .push_response(POOR_HTML);
        let strategies = strategies(mock);
        let best = strategies
            .best_of_n(&request("gemini"), 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(best.html, RICH_HTML);
    }

    #[tokio::test]
    async fn test_best_of_n_skips_failures() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini)
            .push_error(ProviderError::EmptyResponse {
                provider: "gemini".to_string(),
            })
            .push_response(POOR_HTML);
        let strategies = strategies(mock);
        let best = strategies
            .best_of_n(&request("gemini"), 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(best.html, POOR_HTML);
    }

    #[tokio::test]
    async fn test_best_of_n_all_failed_returns_first_error() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini);
        let strategies = strategies(mock);
        assert!(strategies
            .best_of_n(&request("gemini"), 2, &CancellationToken::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_refine_improves_supplied_candidate() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).push_response(RICH_HTML);
        let strategies = strategies(mock);
        let poor = strategies_candidate(POOR_HTML);

        let refined = strategies
            .refine(
                &request("gemini"),
                poor,
                &RefineOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(refined.html, RICH_HTML);
    }

    #[tokio::test]
    async fn test_refine_stops_on_first_non_improving_round() {
        // Every refinement returns the same poor document: one round runs,
        // the loop stops, the input survives.
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(POOR_HTML);
        let router = Arc::new(Router::empty().with_provider(Arc::new(mock)));
        let strategies = Strategies::new(router, Arc::new(Validator::new()), 3);
        let poor = strategies_candidate(POOR_HTML);

        let options = RefineOptions {
            threshold: 0.99,
            max_rounds: 5,
        };
        let refined = strategies
            .refine(&request("gemini"), poor.clone(), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(refined.score.total, poor.score.total);
    }

    #[tokio::test]
    async fn test_refine_skips_candidate_already_at_threshold() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(POOR_HTML);
        let mock = Arc::new(mock);
        let router = Arc::new(Router::empty().with_provider(mock.clone()));
        let strategies = Strategies::new(router, Arc::new(Validator::new()), 3);
        let rich = strategies_candidate(RICH_HTML);

        let refined = strategies
            .refine(
                &request("gemini"),
                rich.clone(),
                &RefineOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(refined.html, rich.html);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_refine_never_returns_worse_than_input() {
        // A mid-quality input and consistently poor refinements.
        let mid = strategies_candidate("<html><script>x</script><style>y</style></html>");
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(POOR_HTML);
        let strategies = strategies(mock);

        let options = RefineOptions {
            threshold: 0.99,
            max_rounds: 3,
        };
        let refined = strategies
            .refine(&request("gemini"), mid.clone(), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert!(refined.score.total >= mid.score.total);
        assert_eq!(refined.html, mid.html);
    }

    #[tokio::test]
    async fn test_iteration_chain_improves_and_records() {
        // Poor first, rich on refinement.
        let mock = MockHtmlProvider::new(ProviderKind::Gemini)
            .push_response(POOR_HTML)
            .push_response(RICH_HTML);
        let strategies = strategies(mock);
        let options = ChainOptions {
            threshold: 0.7,
            max_rounds: 2,
            patience: 2,
        };
        let (candidate, records) = strategies
            .iteration_chain(&request("gemini"), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(candidate.html, RICH_HTML);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].iteration, 0);
        assert!(records[1].improved);
        // Final never scores below initial.
        assert!(records.last().unwrap().total >= records[0].total);
    }

    #[tokio::test]
    async fn test_iteration_chain_never_regresses() {
        // Refinement returns something worse; the chain keeps the original.
        let mock = MockHtmlProvider::new(ProviderKind::Gemini)
            .push_response(RICH_HTML)
            .with_default(POOR_HTML);
        let strategies = strategies(mock);
        let options = ChainOptions {
            threshold: 0.99,
            max_rounds: 2,
            patience: 1,
        };
        let (candidate, records) = strategies
            .iteration_chain(&request("gemini"), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(candidate.html, RICH_HTML);
        assert!(records.iter().skip(1).all(|r| !r.improved));
    }

    #[tokio::test]
    async fn test_iteration_chain_stops_at_threshold() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).push_response(RICH_HTML);
        let strategies = strategies(mock);
        let (_, records) = strategies
            .iteration_chain(
                &request("gemini"),
                &ChainOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        // Rich document clears the threshold immediately: no refinement.
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_ab_test_picks_winner_and_sorts_variants() {
        let gemini = MockHtmlProvider::new(ProviderKind::Gemini).with_default(POOR_HTML);
        let claude = MockHtmlProvider::new(ProviderKind::Anthropic).with_default(RICH_HTML);
        let ollama = MockHtmlProvider::new(ProviderKind::Ollama)
            .with_default("<html><script>x</script></html>");
        let router = Arc::new(
            Router::empty()
                .with_provider(Arc::new(gemini))
                .with_provider(Arc::new(claude))
                .with_provider(Arc::new(ollama)),
        );
        let strategies = Strategies::new(router, Arc::new(Validator::new()), 3);

        let outcome = strategies
            .ab_test(
                &request("gemini"),
                &["gemini".to_string(), "claude".to_string(), "ollama".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.winner, "claude");
        assert_eq!(outcome.variants.len(), 3);
        assert!(outcome.variants[0].total >= outcome.variants[1].total);
        assert!(outcome.variants[1].total >= outcome.variants[2].total);
        // Winner carries no issues; losers list up to three.
        assert!(outcome.variants[0].top_issues.is_empty());
        assert!(outcome.variants[2].top_issues.len() <= 3);
    }

    #[tokio::test]
    async fn test_ab_test_omits_failed_providers() {
        let gemini = MockHtmlProvider::new(ProviderKind::Gemini); // always fails
        let claude = MockHtmlProvider::new(ProviderKind::Anthropic).with_default(RICH_HTML);
        let router = Arc::new(
            Router::empty()
                .with_provider(Arc::new(gemini))
                .with_provider(Arc::new(claude)),
        );
        let strategies = Strategies::new(router, Arc::new(Validator::new()), 3);

        let outcome = strategies
            .ab_test(
                &request("gemini"),
                &["gemini".to_string(), "claude".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.winner, "claude");
        assert_eq!(outcome.variants.len(), 1);
    }

    #[tokio::test]
    async fn test_ab_test_all_failed() {
        let gemini = MockHtmlProvider::new(ProviderKind::Gemini);
        let router = Arc::new(Router::empty().with_provider(Arc::new(gemini)));
        let strategies = Strategies::new(router, Arc::new(Validator::new()), 3);
        let err = strategies
            .ab_test(
                &request("gemini"),
                &["gemini".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            forge_core::ForgeError::Provider(ProviderError::AllProvidersFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_prompt_duel() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini)
            .push_response(POOR_HTML)
            .push_response(RICH_HTML);
        let strategies = strategies(mock);
        let outcome = strategies
            .prompt_duel(
                &request("gemini"),
                &["variant one prompt".to_string(), "variant two prompt".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.variants.len(), 2);
        assert_eq!(outcome.winner_html, RICH_HTML);
    }

    #[tokio::test]
    async fn test_fallback_test_uses_fallback_when_primary_fails() {
        let gemini = MockHtmlProvider::new(ProviderKind::Gemini); // fails
        let claude = MockHtmlProvider::new(ProviderKind::Anthropic).with_default(RICH_HTML);
        let router = Arc::new(
            Router::empty()
                .with_provider(Arc::new(gemini))
                .with_provider(Arc::new(claude)),
        );
        let strategies = Strategies::new(router, Arc::new(Validator::new()), 3);

        let candidate = strategies
            .fallback_test(
                &request("gemini"),
                "gemini",
                "claude",
                0.7,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(candidate.html, RICH_HTML);
    }

    #[tokio::test]
    async fn test_fallback_test_keeps_primary_above_threshold() {
        let gemini = MockHtmlProvider::new(ProviderKind::Gemini).with_default(RICH_HTML);
        let claude = MockHtmlProvider::new(ProviderKind::Anthropic);
        let claude_calls = Arc::new(claude);
        let router = Arc::new(
            Router::empty()
                .with_provider(Arc::new(gemini))
                .with_provider(claude_calls.clone()),
        );
        let strategies = Strategies::new(router, Arc::new(Validator::new()), 3);

        strategies
            .fallback_test(
                &request("gemini"),
                "gemini",
                "claude",
                0.7,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(claude_calls.calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_test_returns_higher_of_two() {
        let gemini = MockHtmlProvider::new(ProviderKind::Gemini)
            .with_default("<html><script>x</script><style>y</style></html>");
        let claude = MockHtmlProvider::new(ProviderKind::Anthropic).with_default(POOR_HTML);
        let router = Arc::new(
            Router::empty()
                .with_provider(Arc::new(gemini))
                .with_provider(Arc::new(claude)),
        );
        let strategies = Strategies::new(router, Arc::new(Validator::new()), 3);

        let candidate = strategies
            .fallback_test(
                &request("gemini"),
                "gemini",
                "claude",
                0.99,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        // Primary scored below threshold but above the fallback: keep it.
        assert!(candidate.html.contains("<script>"));
    }

    #[tokio::test]
    async fn test_evolve_early_stops_on_threshold() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(RICH_HTML);
        let strategies = strategies(mock);
        let options = EvolveOptions {
            population: 4,
            generations: 5,
            seed: Some(7),
            ..Default::default()
        };
        let outcome = strategies
            .evolve(&request("gemini"), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.generations_run, 1);
        assert!(outcome.best.score.total >= options.threshold);
    }

    #[tokio::test]
    async fn test_evolve_survives_individual_failures() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini)
            .push_error(ProviderError::EmptyResponse {
                provider: "gemini".to_string(),
            })
            .with_default(POOR_HTML);
        let strategies = strategies(mock);
        let options = EvolveOptions {
            population: 3,
            generations: 2,
            threshold: 0.99,
            seed: Some(7),
            ..Default::default()
        };
        let outcome = strategies
            .evolve(&request("gemini"), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.best.html, POOR_HTML);
    }

    // ------------------------------------------------------------------
    // gene operator units
    // ------------------------------------------------------------------

    #[test]
    fn test_tokenize_drops_short_genes() {
        let genes = genes::tokenize("Build a tracker. Go! With charts and streaks.\nDark mode");
        assert!(genes.contains(&"Build a tracker".to_string()));
        assert!(genes.contains(&"Dark mode".to_string()));
        assert!(!genes.iter().any(|g| g == "Go"));
    }

    #[test]
    fn test_crossover_mixes_parent_genes() {
        let mut rng = StdRng::seed_from_u64(42);
        let child = genes::crossover(
            "Alpha sentence one. Alpha sentence two.",
            "Beta sentence one. Beta sentence two.",
            &mut rng,
        );
        let parents_joined = "Alpha sentence one. Alpha sentence two. Beta sentence one. Beta sentence two.";
        for gene in genes::tokenize(&child) {
            assert!(parents_joined.contains(&gene));
        }
    }

    #[test]
    fn test_mutate_rate_one_touches_every_gene() {
        let mut rng = StdRng::seed_from_u64(42);
        let mutated = genes::mutate_prompt("First long gene here. Second long gene here.", 1.0, &mut rng);
        let hit_count = genes::MUTATIONS
            .iter()
            .map(|m| mutated.matches(m).count())
            .sum::<usize>();
        assert!(hit_count >= 2);
    }

    #[test]
    fn test_mutate_rate_zero_is_identity_on_genes() {
        let mut rng = StdRng::seed_from_u64(42);
        let prompt = "First long gene here. Second long gene here";
        assert_eq!(genes::mutate_prompt(prompt, 0.0, &mut rng), prompt);
    }

    #[test]
    fn test_tournament_prefers_fitter() {
        let mut rng = StdRng::seed_from_u64(42);
        let weak = Individual {
            prompt: "weak".to_string(),
            html: None,
            fitness: Some(Score::zero("weak")),
            generation: 0,
        };
        let strong = Individual {
            prompt: "strong".to_string(),
            html: None,
            fitness: Some(Score::from_axes(1.0, 1.0, 1.0, 1.0, vec![])),
            generation: 0,
        };
        let population = vec![weak, strong];
        // With k equal to the population size the fittest always wins
        // eventually; sample a few rounds.
        let mut strong_wins = 0;
        for _ in 0..10 {
            if genes::tournament(&population, 3, &mut rng).prompt == "strong" {
                strong_wins += 1;
            }
        }
        assert!(strong_wins >= 8);
    }
}
