extern crate nalgebra as na;

use na::{Matrix4, Point3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use tracecore::camera::Camera;
use tracecore::lighttree::{build_light_tree, sample_light, LightNode};
use tracecore::scene::inst::Shape;
use tracecore::scene::mesh::Mesh;
use tracecore::scene::mtl::Material;
use tracecore::scene::tri::Triangle;
use tracecore::scene::Scene;
use tracecore::types::ray::Ray;

const WIDTH: usize = 320;
const HEIGHT: usize = 200;

fn quad(mtl_id: u16, size: f32) -> Mesh {
    let v = [
        Point3::new(-size, 0.0, -size),
        Point3::new(size, 0.0, -size),
        Point3::new(size, 0.0, size),
        Point3::new(-size, 0.0, size),
    ];
    Mesh::new(vec![
        Triangle::new([v[0], v[2], v[1]], None, mtl_id),
        Triangle::new([v[0], v[3], v[2]], None, mtl_id),
    ])
}

fn build_scene() -> tracecore::Result<Scene> {
    let mut s = Scene::new(4, 8, 1, 16)?;

    let white = s.add_material(Material::new(Vector3::new(0.8, 0.8, 0.8)))?;
    let red = s.add_material(Material::new(Vector3::new(0.8, 0.1, 0.1)))?;
    let light = s.add_material(Material::emissive(Vector3::new(1.0, 0.9, 0.7), 20.0))?;

    let ceiling_light = s.attach_mesh(quad(light, 1.0), true)?;
    s.finalize();

    s.add_shape_instance(Shape::Plane, white, 0, Matrix4::identity())?;
    s.add_shape_instance(
        Shape::Sphere,
        red,
        0,
        Matrix4::new_translation(&Vector3::new(-1.5, 1.0, 0.0)),
    )?;
    s.add_shape_instance(
        Shape::Box,
        white,
        0,
        Matrix4::new_translation(&Vector3::new(1.5, 1.0, 0.0))
            * Matrix4::new_rotation(Vector3::new(0.0, 0.6, 0.0)),
    )?;
    s.add_instance(
        ceiling_light,
        None,
        0,
        Matrix4::new_translation(&Vector3::new(0.0, 4.0, 0.0))
            * Matrix4::new_rotation(Vector3::new(std::f32::consts::PI, 0.0, 0.0)),
    )?;

    s.set_bg_col(Vector3::new(0.02, 0.02, 0.05));
    s.update_camera(0, Camera::new(Point3::new(0.0, 2.0, 7.0), Point3::new(0.0, 1.0, 0.0), 45.0))?;
    s.set_active_camera(0)?;

    Ok(s)
}

/// Trace one primary ray per pixel and count the hits.
fn trace(s: &Scene) -> tracecore::Result<usize> {
    let cam = s.active_camera();
    let forward = cam.forward();
    let right = forward.cross(&Vector3::y()).normalize();
    let up = right.cross(&forward);

    let half_h = (cam.vert_fov.to_radians() * 0.5).tan();
    let half_w = half_h * WIDTH as f32 / HEIGHT as f32;

    let rows: Vec<usize> = (0..HEIGHT)
        .into_par_iter()
        .map(|y| -> tracecore::Result<usize> {
            let mut hits = 0;
            for x in 0..WIDTH {
                let px = (2.0 * (x as f32 + 0.5) / WIDTH as f32 - 1.0) * half_w;
                let py = (1.0 - 2.0 * (y as f32 + 0.5) / HEIGHT as f32) * half_h;
                let dir = (forward + px * right + py * up).normalize();
                let r = Ray::new(cam.eye, dir);
                if s.intersect(&r)?.is_hit() {
                    hits += 1;
                }
            }
            Ok(hits)
        })
        .collect::<tracecore::Result<Vec<usize>>>()?;

    Ok(rows.iter().sum())
}

fn run() -> tracecore::Result<()> {
    log::info!("Building scene...");
    let now = std::time::SystemTime::now();
    let mut s = build_scene()?;
    s.prepare_render()?;
    let build_elapsed = now.elapsed().unwrap_or_default();

    log::info!(
        "Scene ready: {} instances, {} tris, {} light tris",
        s.instances().len(),
        s.tri_cnt(),
        s.ltri_cnt()
    );

    let mut light_nodes = vec![
        LightNode {
            min: Point3::origin(),
            children: 0,
            max: Point3::origin(),
            idx: 0,
            nrm: Vector3::zeros(),
            intensity: 0.0,
        };
        2 * s.ltri_cnt() as usize
    ];
    let light_node_cnt = build_light_tree(&mut light_nodes, s.ltris());

    let mut rng = StdRng::seed_from_u64(42);
    if let Some((light, pdf)) = sample_light(&light_nodes, light_node_cnt, &mut rng) {
        log::debug!("Sampled light {} with pdf {:.4}", light, pdf);
    }

    log::info!("Tracing...");
    let now = std::time::SystemTime::now();
    let hits = trace(&s)?;
    let trace_elapsed = now.elapsed().unwrap_or_default();
    log::info!("{} of {} primary rays hit", hits, WIDTH * HEIGHT);

    // Move the sphere and reconcile again; only the TLAS should rebuild
    s.update_transform(1, Matrix4::new_translation(&Vector3::new(-1.5, 2.0, 0.0)))?;
    let now = std::time::SystemTime::now();
    s.prepare_render()?;
    let update_elapsed = now.elapsed().unwrap_or_default();

    log::info!(
        "Done. Build: {:?}. Trace: {:?}. Incremental update: {:?}",
        build_elapsed,
        trace_elapsed,
        update_elapsed
    );
    Ok(())
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .init();

    if let Err(e) = run() {
        log::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}
