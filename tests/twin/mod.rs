mod batch;
mod plant_loop;
