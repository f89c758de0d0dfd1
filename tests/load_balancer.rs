use allm_router::LoadBalancer;

fn ids(models: &[&str]) -> Vec<String>
{   models.iter().map(|m| m.to_string()).collect()
}

#[test]
fn test_each_model_once_after_reset()
{   let balancer = LoadBalancer::new();
    let models = ids(&["a/1", "b/2", "c/3", "d/4"]);

    // skew the counters, then start over
    for _ in 0..5
    {   balancer.select(&models[..1]);
    }
    balancer.reset();

    let mut picked: Vec<String> = (0..models.len())
      .filter_map(|_| balancer.select(&models))
      .collect();
    assert_eq!(picked, models);
    picked.sort();
    picked.dedup();
    assert_eq!(picked.len(), 4);
}

#[test]
fn test_least_loaded_wins()
{   let balancer = LoadBalancer::new();
    let models = ids(&["a/1", "b/2"]);

    balancer.select(&models[..1]);
    balancer.select(&models[..1]);
    assert_eq!(balancer.select(&models).as_deref(), Some("b/2"));
    assert_eq!(balancer.select(&models).as_deref(), Some("b/2"));
    // tied at two apiece: first in the list wins
    assert_eq!(balancer.select(&models).as_deref(), Some("a/1"));
    assert_eq!(balancer.count("a/1"), 3);
    assert_eq!(balancer.count("b/2"), 2);
}

#[test]
fn test_empty_list()
{   let balancer = LoadBalancer::new();
    assert!(balancer.select(&[]).is_none());
    assert_eq!(balancer.count("a/1"), 0);
}
