mod reconcile;
mod runner;
mod scan_run;
