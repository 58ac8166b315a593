use altiquery::{Client, PollPolicy, Query, SpatialExtent, SubsetOptions, TemporalRange};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Configure Earthdata credentials via env vars or a `.netrc` entry.
    env_logger::init();
    let client = Client::from_env()?;

    let spatial = SpatialExtent::from_bbox([-55.0, 68.0, -48.0, 71.0], None)?;
    let temporal = TemporalRange::from_string_pair("2019-02-20", "2019-02-28", None, None)?;
    let mut query = Query::new("ATL06", spatial, Some(temporal))?.with_subset(SubsetOptions {
        variables: Some(vec!["gt1l/land_ice_segments/h_li".to_string()]),
        ..Default::default()
    });

    println!("version {}", query.version(&client)?);
    println!("{:?}", query.summary(&client)?);

    let policy = PollPolicy::default().with_max_elapsed(Duration::from_secs(2 * 60 * 60));
    let files = query.download_granules(&client, Path::new("atl06_greenland"), false, &policy)?;
    println!("downloaded {} file(s)", files.len());
    Ok(())
}
