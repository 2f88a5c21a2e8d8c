use std::path::PathBuf;

use dti_tract::{
    Config, MeasureMap, Orientation, StatisticsSession, TensorMeasureKind, TensorToColor,
    Tractography,
    phantom::{self, ArcPhantom},
    seeding::region_seeds,
    tractography::TENSOR_ARRAY_NAME,
};
use tracing::info;

fn main() {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_json_file(&PathBuf::from(path))
            .expect("should have loaded the configuration"),
        None => Config::default(),
    };

    let arc = ArcPhantom {
        center: [20.0, 20.0],
        ..Default::default()
    };
    let field = phantom::circular_arc([40, 40, 5], [1.0; 3], &arc)
        .expect("should have built the arc phantom");

    let tracker =
        Tractography::new(&field, config.tracking).expect("should have prepared the tracker");
    let seeds = region_seeds([20.0, 32.0, 2.0], 2.0, 1.0).expect("should have seeded the region");
    let mut output = tracker.track(&seeds).expect("should have tracked the seeds");
    info!(
        fibers = output.bundle.num_fibers(),
        terminations = ?output.terminations,
        "tracking done"
    );

    TensorToColor::new(TensorMeasureKind::FractionalAnisotropy)
        .apply(&mut output.bundle)
        .expect("should have colored the fibers");
    TensorToColor::color_by_orientation(&mut output.bundle, TENSOR_ARRAY_NAME)
        .expect("should have set colors");

    let mut statistics = StatisticsSession::new(config.statistics);
    statistics.add_bundle("Phantom:Arc", &output.bundle);
    statistics.compute_clusters().expect("should have aggregated clusters");
    println!("{}", statistics.render());

    let fa = MeasureMap::from_field(&field, TensorMeasureKind::FractionalAnisotropy);
    let image = fa
        .get_image_from_axis(fa.dim().2 / 2, Orientation::Axial, (0.0, 1.0))
        .expect("should have returned image at center of the field");
    image.save("fa_axial.png").expect("should have written the image");
}
