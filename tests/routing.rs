// Route optimizer integration tests
// Direct and multi-hop discovery across fixed-rate venues
//
// Numan Thabit 2025 Nov

mod support;

use relay_aggr::router::{RankBy, RouteQuery};
use relay_aggr::venues::VenueAdapter;
use std::collections::HashSet;
use std::sync::Arc;
use support::{optimizer, optimizer_over, FixedRateVenue, TieredVenue};

fn venues() -> Vec<FixedRateVenue> {
    vec![
        FixedRateVenue::new("direct", &[("WETH", "DAI", 1990.0)]),
        FixedRateVenue::new("eth-usd", &[("WETH", "USDC", 2000.0)]),
        FixedRateVenue::new("stables", &[("USDC", "DAI", 0.999)]),
    ]
}

#[tokio::test]
async fn two_leg_route_through_intermediate_beats_direct() {
    let opt = optimizer(venues(), &["USDC"]);
    let query = RouteQuery::new("WETH", "DAI", 1.0, 1).rank_by(RankBy::AmountOut);

    let routes = opt.find_routes(&query).await;
    assert_eq!(routes.len(), 2);

    let best = &routes[0];
    assert_eq!(best.hops.len(), 2);
    assert_eq!(best.hops[0].token_out, "USDC");
    assert!((best.expected_amount_out - 1998.0).abs() < 1e-9);
    assert_eq!(best.token_in(), "WETH");
    assert_eq!(best.token_out(), "DAI");

    let direct = &routes[1];
    assert_eq!(direct.hops.len(), 1);
    assert!((direct.expected_amount_out - 1990.0).abs() < 1e-9);
}

#[tokio::test]
async fn zero_max_hops_keeps_only_direct_routes() {
    let opt = optimizer(venues(), &["USDC"]);
    let routes = opt.find_routes(&RouteQuery::new("WETH", "DAI", 1.0, 0)).await;
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].hops[0].venue, "direct");
}

#[tokio::test]
async fn limit_truncates_and_scores_stay_ordered() {
    let opt = optimizer(venues(), &["USDC"]);
    let all = opt.find_routes(&RouteQuery::new("WETH", "DAI", 1.0, 1)).await;
    assert!(all.windows(2).all(|w| w[0].combined_score >= w[1].combined_score));
    assert!(all.iter().all(|r| (0.0..=1.0).contains(&r.combined_score)));

    let limited = opt
        .find_routes(&RouteQuery::new("WETH", "DAI", 1.0, 1).limit(1))
        .await;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, all[0].id);
}

#[tokio::test]
async fn unknown_pair_yields_no_routes() {
    let opt = optimizer(venues(), &["USDC"]);
    assert!(opt.find_routes(&RouteQuery::new("WBTC", "DAI", 1.0, 2)).await.is_empty());
    assert!(opt.find_routes(&RouteQuery::new("WETH", "WETH", 1.0, 1)).await.is_empty());
}

#[tokio::test]
async fn concentrated_legs_expand_into_every_existing_fee_pair() {
    // USDC/DAI has no 3000 pool.
    let venue = Arc::new(TieredVenue::new(
        "clmm",
        &[500, 3000],
        &[
            ("WETH", "USDC", 500, 2000.0),
            ("WETH", "USDC", 3000, 1990.0),
            ("USDC", "DAI", 500, 0.999),
        ],
    ));
    let opt = optimizer_over(vec![venue.clone() as Arc<dyn VenueAdapter>], &["USDC"]);
    let routes = opt
        .find_routes(&RouteQuery::new("WETH", "DAI", 1.0, 1).rank_by(RankBy::AmountOut))
        .await;

    let fees: Vec<(Option<u32>, Option<u32>)> = routes
        .iter()
        .map(|r| (r.hops[0].fee, r.hops[1].fee))
        .collect();
    assert_eq!(fees, vec![(Some(500), Some(500)), (Some(3000), Some(500))]);
    assert!((routes[0].expected_amount_out - 1998.0).abs() < 1e-9);
    assert!((routes[1].expected_amount_out - 1990.0 * 0.999).abs() < 1e-9);
    assert_ne!(routes[0].id, routes[1].id);
    assert_ne!(routes[0].hops[0].pool_ref, routes[1].hops[0].pool_ref);
    // Two first legs and one closing leg per partial; the missing tier is never quoted.
    assert_eq!(venue.quotes(), 4);
}

/// IN fans out to M1..M5 at rates 1..5, each Mi reaches X at par, X reaches OUT at par.
fn fan_out_venue() -> Arc<dyn VenueAdapter> {
    let mids = ["M1", "M2", "M3", "M4", "M5"];
    let mut rates: Vec<(&str, &str, f64)> = Vec::new();
    for (i, mid) in mids.iter().enumerate() {
        rates.push(("IN", *mid, (i + 1) as f64));
        rates.push((*mid, "X", 1.0));
    }
    rates.push(("X", "OUT", 1.0));
    Arc::new(FixedRateVenue::new("fan", &rates))
}

#[tokio::test]
async fn beam_keeps_best_partials_per_frontier_token() {
    let intermediates = ["M1", "M2", "M3", "M4", "M5", "X"];
    let query = RouteQuery::new("IN", "OUT", 1.0, 2).rank_by(RankBy::AmountOut);

    let narrow = optimizer_over(vec![fan_out_venue()], &intermediates).with_beam_width(2);
    let routes = narrow.find_routes(&query).await;
    let via: Vec<&str> = routes.iter().map(|r| r.hops[0].token_out.as_str()).collect();
    assert_eq!(via, vec!["M5", "M4"]);
    assert!(routes.iter().all(|r| r.hops.len() == 3));

    let wide = optimizer_over(vec![fan_out_venue()], &intermediates);
    let routes = wide.find_routes(&query).await;
    let via: HashSet<&str> = routes.iter().map(|r| r.hops[0].token_out.as_str()).collect();
    assert_eq!(via, HashSet::from(["M5", "M4", "M3", "M2"]));
}
