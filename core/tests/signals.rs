//! Signal extractors against hand-built ledgers.

use spendwatch_core::{
    aggregate::{build_aggregates, AggregateSet},
    collaborator::RegionMap,
    config::PipelineConfig,
    fact::{ClaimFact, InMemoryFacts},
    signals::{extract_signals, growth, mix, outlier},
    types::ProviderId,
};

fn fact(provider_id: ProviderId, code: &str, period: &str, claims: i64, paid_cents: i64) -> ClaimFact {
    ClaimFact {
        provider_id,
        procedure_code: code.to_string(),
        period: period.parse().unwrap(),
        claim_count: claims,
        paid_cents,
        beneficiary_count: claims,
    }
}

fn build(facts: Vec<ClaimFact>, regions: &RegionMap) -> AggregateSet {
    build_aggregates(&InMemoryFacts::new(facts), regions).unwrap()
}

fn one_region(ids: impl IntoIterator<Item = ProviderId>) -> RegionMap {
    ids.into_iter().map(|id| (id, "TX".to_string())).collect()
}

// ── Signal 1: billing rate ─────────────────────────────────────

/// Ten providers bill $10/claim; provider 99 bills $1000/claim on three codes.
fn rate_outlier_ledger() -> (Vec<ClaimFact>, RegionMap) {
    let mut facts = Vec::new();
    for code in ["97110", "97112", "97140"] {
        for id in 1..=10 {
            facts.push(fact(id, code, "2021-05", 100, 100 * 10_00));
        }
        facts.push(fact(99, code, "2021-05", 10, 10 * 1_000_00));
    }
    (facts, one_region((1..=10).chain([99])))
}

#[test]
fn provider_far_above_regional_rate_is_an_outlier() {
    let (facts, regions) = rate_outlier_ledger();
    let set = build(facts, &regions);
    let cfg = PipelineConfig::default_test();
    let out = outlier::extract(&set, &regions, &cfg.outlier, cfg.score_cap);

    let e = &out[&99];
    assert_eq!(e.procs_10x, 3);
    assert_eq!(e.score, 60.0);
    assert_eq!(e.outlier_spend_cents, 3 * 10 * 1_000_00);
    // Pool: $20,000 over 1,010 claims.
    assert!((e.max_ratio - 1000.0 / (20_000.0 / 1010.0)).abs() < 1e-9);

    let normal = out.get(&1).map_or(0.0, |e| e.score);
    assert_eq!(normal, 0.0);
}

#[test]
fn small_pools_are_ignored() {
    let mut facts = Vec::new();
    for id in 1..=3 {
        facts.push(fact(id, "97110", "2021-05", 100, 100 * 10_00));
    }
    facts.push(fact(99, "97110", "2021-05", 10, 10 * 1_000_00));
    let regions = one_region([1, 2, 3, 99]);
    let set = build(facts, &regions);
    let cfg = PipelineConfig::default_test();

    let out = outlier::extract(&set, &regions, &cfg.outlier, cfg.score_cap);
    assert!(out.values().all(|e| e.score == 0.0));
}

/// Provider 6 bills $1000/claim but on only 9 claims, one short of the
/// minimum. It neither joins the pool nor moves the regional average.
#[test]
fn provider_below_min_claims_stays_out_of_the_pool() {
    let cfg = PipelineConfig::default_test();
    assert_eq!(cfg.outlier.min_claims, 10);

    let heavy = fact(6, "97110", "2021-05", 9, 9 * 1_000_00);
    let mut facts: Vec<ClaimFact> =
        (1..=5).map(|id| fact(id, "97110", "2021-05", 100, 100 * 10_00)).collect();
    facts.push(heavy.clone());
    let regions = one_region(1..=6);
    let out = outlier::extract(&build(facts, &regions), &regions, &cfg.outlier, cfg.score_cap);

    assert!(!out.contains_key(&6));
    assert_eq!(out.len(), 5);
    assert!(out.values().all(|e| e.max_ratio == 1.0 && e.score == 0.0));

    // Four qualifying providers plus provider 6 is still a pool of four.
    let mut facts: Vec<ClaimFact> =
        (1..=4).map(|id| fact(id, "97110", "2021-05", 100, 100 * 10_00)).collect();
    facts.push(heavy);
    let regions = one_region([1, 2, 3, 4, 6]);
    let out = outlier::extract(&build(facts, &regions), &regions, &cfg.outlier, cfg.score_cap);
    assert!(out.is_empty());
}

/// A pool whose claims sum to zero has no regional average and drops out
/// of the signal for every provider in it.
#[test]
fn zero_claim_pool_is_skipped_without_fault() {
    let mut cfg = PipelineConfig::default_test();
    cfg.outlier.min_claims = 0;
    let facts: Vec<ClaimFact> = (1..=6).map(|id| fact(id, "G0151", "2021-01", 0, 0)).collect();
    let regions = one_region(1..=6);
    let set = build(facts, &regions);

    let out = outlier::extract(&set, &regions, &cfg.outlier, cfg.score_cap);
    assert!(out.is_empty());
}

#[test]
fn outlier_score_is_monotone_and_capped() {
    let cfg = PipelineConfig::default_test();
    let mut previous = 0.0;
    for procs in 1..=5 {
        let s = outlier::score(procs, &cfg.outlier, cfg.score_cap);
        assert!(s > previous);
        previous = s;
    }
    assert_eq!(outlier::score(5, &cfg.outlier, cfg.score_cap), 100.0);
    assert_eq!(outlier::score(12, &cfg.outlier, cfg.score_cap), 100.0);
    assert_eq!(outlier::score(0, &cfg.outlier, cfg.score_cap), 0.0);
}

// ── Signal 2: growth ───────────────────────────────────────────

#[test]
fn year_over_year_spike_is_scored() {
    let facts = vec![
        fact(1, "E1390", "2019-06", 100, 20_000_00),
        fact(1, "E1390", "2020-06", 400, 80_000_00),
        // prior year too small
        fact(2, "E1390", "2019-06", 10, 5_000_00),
        fact(2, "E1390", "2020-06", 400, 80_000_00),
        // current year too small
        fact(3, "E1390", "2019-06", 100, 20_000_00),
        fact(3, "E1390", "2020-06", 200, 40_000_00),
        // gap year: 2019 and 2021 are not consecutive
        fact(4, "E1390", "2019-06", 100, 20_000_00),
        fact(4, "E1390", "2021-06", 400, 90_000_00),
    ];
    let set = build(facts, &RegionMap::new());
    let cfg = PipelineConfig::default_test();
    let out = growth::extract(&set, &cfg.growth, cfg.score_cap);

    let e = &out[&1];
    assert!((e.max_yoy - 4.0).abs() < 1e-12);
    assert_eq!(e.years_3x, 1);
    assert!((e.score - 30.0).abs() < 1e-9);
    assert!(!out.contains_key(&2));
    assert!(!out.contains_key(&3));
    assert!(!out.contains_key(&4));
}

#[test]
fn shrinking_spend_scores_zero() {
    let cfg = PipelineConfig::default_test();
    assert_eq!(growth::score(0.5, &cfg.growth, cfg.score_cap), 0.0);
    assert_eq!(growth::score(1.0, &cfg.growth, cfg.score_cap), 0.0);
    assert_eq!(growth::score(50.0, &cfg.growth, cfg.score_cap), 100.0);
}

// ── Signal 3: procedure mix ────────────────────────────────────

/// 60 providers bill three common codes; provider 1 also bills two codes
/// nobody else in the region touches.
#[test]
fn regionally_rare_procedures_raise_mix_score() {
    let mut facts = Vec::new();
    for id in 1..=60 {
        for code in ["99213", "99214", "99215"] {
            facts.push(fact(id, code, "2021-03", 20, 2_000_00));
        }
    }
    facts.push(fact(1, "L3000", "2021-03", 8, 4_000_00));
    facts.push(fact(1, "L3010", "2021-03", 8, 4_000_00));
    // below min_claims: neither counted in the mix nor as prevalence
    facts.push(fact(2, "L3020", "2021-03", 2, 1_000_00));
    let regions = one_region(1..=60);
    let set = build(facts, &regions);
    let cfg = PipelineConfig::default_test();

    let out = mix::extract(&set, &regions, &cfg.mix, cfg.score_cap);
    let e = &out[&1];
    assert_eq!(e.total_procs, 5);
    assert_eq!(e.rare_procs, 2);
    assert!((e.rare_pct - 0.4).abs() < 1e-12);
    assert!((e.score - 80.0).abs() < 1e-9);

    let other = &out[&2];
    assert_eq!(other.total_procs, 3);
    assert_eq!(other.rare_procs, 0);
    assert_eq!(other.score, 0.0);
}

#[test]
fn providers_with_too_few_procedures_are_skipped() {
    let facts = vec![
        fact(1, "99213", "2021-03", 20, 2_000_00),
        fact(1, "99214", "2021-03", 20, 2_000_00),
    ];
    let regions = one_region([1]);
    let set = build(facts, &regions);
    let cfg = PipelineConfig::default_test();

    assert!(mix::extract(&set, &regions, &cfg.mix, cfg.score_cap).is_empty());
}

#[test]
fn extract_signals_runs_all_three() {
    let (facts, regions) = rate_outlier_ledger();
    let set = build(facts, &regions);
    let signals = extract_signals(&set, &regions, &PipelineConfig::default_test());

    assert_eq!(signals.outlier[&99].procs_10x, 3);
    assert!(signals.growth.is_empty());
    // three codes billed by all 11 providers: none rare
    assert!(signals.mix.values().all(|e| e.rare_procs == 0));
}
